//! Lotbook core
//!
//! Persists parsed QIF data, rebuilds the FIFO lot ledger and values
//! holdings at any past date. [`Portfolio`] ties the pieces together behind
//! one store handle.

pub mod error;
pub mod holdings;
pub mod import;
pub mod ledger;
pub mod models;
pub mod prices;
pub mod store;
pub mod time;

use lotbook_config::Config;
use lotbook_parser::{DefaultQifParser, ParserRef, QifParser};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub use error::{CoreError, CoreResult, ErrorCode, ErrorDetails, ErrorSeverity};
pub use holdings::{compute_holdings_as_of, Holding, HoldingsInputs, HoldingsQuery};
pub use import::{
    import_entries, import_parsed, plan_import, EntryImportSummary, ImportPlan, ImportReport,
};
pub use ledger::{import_lots, LedgerOutcome, LotImportSummary, LotLedger};
pub use models::{
    Account, InvestmentDetail, Lot, LotAllocation, Price, Security, Transaction, TransactionDetail,
};
pub use prices::PriceIndex;
pub use store::{ImportRows, LedgerStore, SqliteStore};

/// Import and query service over a single store
pub struct Portfolio<S: LedgerStore = SqliteStore> {
    config: Config,
    parser: ParserRef,
    store: Mutex<S>,
}

impl Portfolio<SqliteStore> {
    /// Open the database named in the config
    pub fn open(config: Config) -> CoreResult<Self> {
        let store = SqliteStore::open(config.database_path())?;
        let parser: ParserRef = Arc::new(DefaultQifParser::new(config.import.date_order));
        Ok(Self::new(config, parser, store))
    }
}

impl<S: LedgerStore> Portfolio<S> {
    pub fn new(config: Config, parser: ParserRef, store: S) -> Self {
        Self {
            config,
            parser,
            store: Mutex::new(store),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> MutexGuard<'_, S> {
        // Store writes are transactional, so a poisoned store is still consistent
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read, parse and import a QIF file, then rebuild the lot ledger
    pub async fn import_file(&self, path: PathBuf) -> CoreResult<ImportReport> {
        let parsed = self.parser.parse_file(path).await?;
        import_parsed(&mut *self.store(), &parsed)
    }

    /// Parse and import QIF text, then rebuild the lot ledger
    pub fn import_text(&self, content: &str) -> CoreResult<ImportReport> {
        let parsed = QifParser::new(self.config.import.date_order).parse(content)?;
        import_parsed(&mut *self.store(), &parsed)
    }

    /// Query defaults taken from the holdings config
    pub fn query(&self, as_of: chrono::NaiveDate) -> HoldingsQuery {
        HoldingsQuery::new(as_of)
            .with_stale_after_days(self.config.holdings.stale_after_days)
            .with_cash(self.config.holdings.include_cash)
    }

    pub fn holdings(&self, query: &HoldingsQuery) -> CoreResult<Vec<Holding>> {
        let store = self.store();
        let lots = store.lots()?;
        let allocations = store.allocations()?;
        let prices = store.prices()?;
        let accounts = store.accounts()?;
        let securities = store.securities()?;
        let transactions = store.transactions()?;
        drop(store);

        let inputs = HoldingsInputs {
            lots: &lots,
            allocations: &allocations,
            prices: &prices,
            accounts: &accounts,
            securities: &securities,
            transactions: &transactions,
        };
        Ok(compute_holdings_as_of(&inputs, query))
    }

    pub fn accounts(&self) -> CoreResult<Vec<Account>> {
        self.store().accounts()
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"!Type:Security
NApple
SAPL
TStock
^
!Account
NBrokerage
TInvst
^
!Type:Invst
D1/2'24
NContribX
T2,000.00
^
D1/15'24
NBuy
YApple
I150.25
Q10
T1,502.50
^
D3/1'24
NSell
YApple
I170.00
Q4
T680.00
^
!Type:Prices
"APL",150.25," 1/15'24"
"APL",160.00," 2/15'24"
"APL",170.00," 3/1'24"
^
"#;

    fn portfolio() -> Portfolio<SqliteStore> {
        let config = Config::default();
        let parser: ParserRef = Arc::new(DefaultQifParser::default());
        Portfolio::new(config, parser, SqliteStore::open_in_memory().unwrap())
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_import_and_value() {
        let portfolio = portfolio();
        let report = portfolio.import_text(SAMPLE).unwrap();
        assert_eq!(report.entries.transactions_added, 3);
        assert_eq!(report.entries.prices, 3);
        assert_eq!(report.lots.lots_created, 1);
        assert_eq!(report.lots.allocations, 1);

        let holdings = portfolio.holdings(&portfolio.query(date("2024-02-15"))).unwrap();
        let apple = holdings.iter().find(|h| !h.is_cash).unwrap();
        assert_eq!(apple.symbol.as_deref(), Some("APL"));
        assert!((apple.quantity - 10.0).abs() < 1e-9);
        assert!((apple.cost_basis - 1502.5).abs() < 1e-9);
        assert_eq!(apple.price, Some(160.0));
        assert!((apple.market_value - 1600.0).abs() < 1e-9);

        let cash = holdings.iter().find(|h| h.is_cash).unwrap();
        assert!((cash.market_value - 497.5).abs() < 1e-9);

        let later = portfolio.holdings(&portfolio.query(date("2024-03-15"))).unwrap();
        let apple = later.iter().find(|h| !h.is_cash).unwrap();
        assert!((apple.quantity - 6.0).abs() < 1e-9);
        assert!((apple.cost_basis - 901.5).abs() < 1e-9);
        assert!(apple.is_stale);
    }

    #[test]
    fn test_reimport_keeps_ledger_stable() {
        let portfolio = portfolio();
        portfolio.import_text(SAMPLE).unwrap();
        let first = portfolio.holdings(&portfolio.query(date("2024-03-15"))).unwrap();

        let report = portfolio.import_text(SAMPLE).unwrap();
        assert_eq!(report.entries.transactions_added, 0);
        assert_eq!(portfolio.holdings(&portfolio.query(date("2024-03-15"))).unwrap(), first);
        assert_eq!(portfolio.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_import_error_is_reported() {
        let portfolio = portfolio();
        let err = portfolio.import_text("!Type:Bank\nD1/1'24\nT1\n^\n").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
    }

    #[test]
    fn test_failed_replay_saves_nothing() {
        let portfolio = portfolio();
        portfolio.import_text(SAMPLE).unwrap();
        let accounts = portfolio.accounts().unwrap();
        let transactions = portfolio.store().transactions().unwrap();
        let lots = portfolio.store().lots().unwrap();

        let return_of_capital = r#"!Type:Security
NApple
SAPL
^
!Account
NRetirement
TInvst
^
!Type:Invst
D4/1'24
NRtrnCap
YApple
T25.00
^
"#;
        let err = portfolio.import_text(return_of_capital).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnhandledAction);

        assert_eq!(portfolio.accounts().unwrap(), accounts);
        assert_eq!(portfolio.store().transactions().unwrap(), transactions);
        assert_eq!(portfolio.store().lots().unwrap(), lots);
    }

    #[tokio::test]
    async fn test_import_file() {
        let path = std::env::temp_dir().join(format!("lotbook-test-{}.qif", std::process::id()));
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let portfolio = portfolio();
        let report = portfolio.import_file(path.clone()).await.unwrap();
        assert_eq!(report.entries.accounts_added, 1);

        let missing = portfolio.import_file(path.with_extension("missing")).await;
        assert_eq!(missing.unwrap_err().code(), ErrorCode::IoError);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}

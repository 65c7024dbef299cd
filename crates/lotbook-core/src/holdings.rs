//! Point-in-time holdings valuation
//!
//! Stored lots describe the ledger as of today. To value a portfolio on an
//! earlier date, each lot is wound back by undoing the allocations dated
//! after that date.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{is_zero, Account, Lot, LotAllocation, Price, Security, Transaction, EPSILON};
use crate::prices::PriceIndex;
use crate::time::{day_before, days_between, format_date};

/// One position, or the cash of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub account_id: String,
    pub account_name: String,
    /// `None` for cash
    pub security_id: Option<String>,
    pub security_name: String,
    pub symbol: Option<String>,
    pub quantity: f64,
    pub cost_basis: f64,
    pub avg_cost_per_share: f64,
    pub price: Option<f64>,
    pub price_date: Option<String>,
    pub market_value: f64,
    pub unrealized_gain_loss: f64,
    /// Percent of the absolute cost basis
    pub unrealized_gain_loss_pct: f64,
    pub day_gain_loss: f64,
    pub is_stale: bool,
    pub is_cash: bool,
    /// Percent of the total market value of the returned holdings
    pub market_value_pct: f64,
}

/// Everything the engine reads
#[derive(Debug, Clone, Copy)]
pub struct HoldingsInputs<'a> {
    pub lots: &'a [Lot],
    pub allocations: &'a [LotAllocation],
    pub prices: &'a [Price],
    pub accounts: &'a [Account],
    pub securities: &'a [Security],
    pub transactions: &'a [Transaction],
}

/// Which holdings to compute
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingsQuery {
    pub as_of: NaiveDate,
    /// Empty means every account
    pub account_ids: Vec<String>,
    /// Case-insensitive match on security name, symbol or account name
    pub filter: Option<String>,
    /// A price older than this many days is stale
    pub stale_after_days: i64,
    pub include_cash: bool,
}

impl HoldingsQuery {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            account_ids: Vec::new(),
            filter: None,
            stale_after_days: 1,
            include_cash: true,
        }
    }

    pub fn with_accounts(mut self, account_ids: Vec<String>) -> Self {
        self.account_ids = account_ids;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.trim().is_empty() { None } else { Some(filter) };
        self
    }

    pub fn with_stale_after_days(mut self, days: i64) -> Self {
        self.stale_after_days = days;
        self
    }

    pub fn with_cash(mut self, include_cash: bool) -> Self {
        self.include_cash = include_cash;
        self
    }

    fn matches(&self, holding: &Holding) -> bool {
        if !self.account_ids.is_empty() && !self.account_ids.contains(&holding.account_id) {
            return false;
        }
        let Some(filter) = self.filter.as_ref() else {
            return true;
        };
        let needle = filter.to_lowercase();
        holding.security_name.to_lowercase().contains(&needle)
            || holding.account_name.to_lowercase().contains(&needle)
            || holding
                .symbol
                .as_ref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
    }
}

#[derive(Default)]
struct Position {
    quantity: f64,
    cost_basis: f64,
}

/// Compute holdings as they stood at the end of `query.as_of`
pub fn compute_holdings_as_of(inputs: &HoldingsInputs<'_>, query: &HoldingsQuery) -> Vec<Holding> {
    let as_of = format_date(query.as_of);
    let previous_day = format_date(day_before(query.as_of));
    let prices = PriceIndex::new(inputs.prices);

    let accounts: HashMap<&str, &Account> =
        inputs.accounts.iter().map(|a| (a.id.as_str(), a)).collect();
    let securities: HashMap<&str, &Security> =
        inputs.securities.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut allocations_by_lot: HashMap<&str, Vec<&LotAllocation>> = HashMap::new();
    for allocation in inputs.allocations {
        allocations_by_lot
            .entry(allocation.lot_id.as_str())
            .or_default()
            .push(allocation);
    }

    let mut transactions_by_account: HashMap<&str, Vec<&Transaction>> = HashMap::new();
    for txn in inputs.transactions {
        transactions_by_account
            .entry(txn.account_id.as_str())
            .or_default()
            .push(txn);
    }
    for txns in transactions_by_account.values_mut() {
        txns.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    }

    // Wind each lot back to the as-of date and sum per (account, security)
    let mut positions: BTreeMap<(&str, &str), Position> = BTreeMap::new();
    for lot in inputs.lots {
        let held = lot.purchase_date.as_str() <= as_of.as_str()
            && lot.closed_date.as_deref().map_or(true, |closed| closed > as_of.as_str());
        if !held {
            continue;
        }

        let (mut quantity, mut cost_basis) = (lot.quantity, lot.cost_basis);
        for allocation in allocations_by_lot.get(lot.id.as_str()).into_iter().flatten() {
            if allocation.date.as_str() <= as_of.as_str() {
                quantity -= allocation.shares_allocated;
                cost_basis -= allocation.cost_basis_allocated;
            }
        }

        let position = positions
            .entry((lot.account_id.as_str(), lot.security_id.as_str()))
            .or_default();
        position.quantity += quantity;
        position.cost_basis += cost_basis;
    }

    let mut holdings = Vec::new();
    let mut accounts_with_positions: Vec<&str> = Vec::new();

    for ((account_id, security_id), position) in positions {
        if is_zero(position.quantity) {
            continue;
        }
        let account_name = accounts
            .get(account_id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| account_id.to_string());
        let security = securities.get(security_id);

        let latest = prices.latest_at_or_before(security_id, &as_of);
        let previous = prices.latest_at_or_before(security_id, &previous_day);

        let market_value = match latest {
            Some((_, price)) => price * position.quantity,
            None => position.cost_basis,
        };
        let is_stale = match latest {
            Some((date, _)) => days_between(date, &as_of)
                .map_or(true, |age| age > query.stale_after_days),
            None => true,
        };
        let day_gain_loss = match (latest, previous) {
            (Some((_, price)), Some((_, prev))) => (price - prev) * position.quantity,
            _ => 0.0,
        };
        let unrealized = market_value - position.cost_basis;

        if !accounts_with_positions.contains(&account_id) {
            accounts_with_positions.push(account_id);
        }

        holdings.push(Holding {
            account_id: account_id.to_string(),
            account_name,
            security_id: Some(security_id.to_string()),
            security_name: security
                .map(|s| s.name.clone())
                .unwrap_or_else(|| security_id.to_string()),
            symbol: security.and_then(|s| s.symbol.clone()),
            quantity: position.quantity,
            cost_basis: position.cost_basis,
            avg_cost_per_share: position.cost_basis / position.quantity,
            price: latest.map(|(_, price)| price),
            price_date: latest.map(|(date, _)| date.to_string()),
            market_value,
            unrealized_gain_loss: unrealized,
            unrealized_gain_loss_pct: if position.cost_basis.abs() > EPSILON {
                unrealized / position.cost_basis.abs() * 100.0
            } else {
                0.0
            },
            day_gain_loss,
            is_stale,
            is_cash: false,
            market_value_pct: 0.0,
        });
    }

    if query.include_cash {
        for account_id in accounts_with_positions {
            let Some(txns) = transactions_by_account.get(account_id) else {
                continue;
            };
            let idx = txns.partition_point(|t| t.date.as_str() <= as_of.as_str());
            if idx == 0 {
                continue;
            }
            let balance = txns[idx - 1].cash_balance;
            holdings.push(cash_holding(account_id, &accounts, balance));
        }
    }

    holdings.retain(|h| query.matches(h));

    let total: f64 = holdings.iter().map(|h| h.market_value).sum();
    if total.abs() > EPSILON {
        for holding in &mut holdings {
            holding.market_value_pct = holding.market_value / total * 100.0;
        }
    }

    holdings.sort_by(|a, b| {
        a.account_name
            .cmp(&b.account_name)
            .then(a.is_cash.cmp(&b.is_cash))
            .then_with(|| a.security_name.cmp(&b.security_name))
    });

    debug!("Computed {} holdings as of {}", holdings.len(), as_of);
    holdings
}

fn cash_holding(account_id: &str, accounts: &HashMap<&str, &Account>, balance: f64) -> Holding {
    Holding {
        account_id: account_id.to_string(),
        account_name: accounts
            .get(account_id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| account_id.to_string()),
        security_id: None,
        security_name: "Cash".to_string(),
        symbol: None,
        quantity: balance,
        cost_basis: balance,
        avg_cost_per_share: if is_zero(balance) { 0.0 } else { 1.0 },
        price: None,
        price_date: None,
        market_value: balance,
        unrealized_gain_loss: 0.0,
        unrealized_gain_loss_pct: 0.0,
        day_gain_loss: 0.0,
        is_stale: false,
        is_cash: true,
        market_value_pct: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::apply_running_balances;
    use crate::ledger::{LedgerOutcome, LotLedger};
    use crate::models::{InvestmentDetail, TransactionDetail};
    use lotbook_parser::InvestmentAction;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn account(id: &str, name: &str) -> Account {
        Account {
            id: id.to_string(),
            name: name.to_string(),
            account_type: Some("Invst".to_string()),
            description: None,
            credit_limit: None,
        }
    }

    fn security(id: &str, name: &str) -> Security {
        Security {
            id: id.to_string(),
            name: name.to_string(),
            symbol: Some(name.to_uppercase()),
            security_type: None,
            goal: None,
        }
    }

    fn price(security_id: &str, on: &str, value: f64) -> Price {
        Price {
            id: format!("{}-{}", security_id, on),
            security_id: security_id.to_string(),
            date: on.to_string(),
            price: value,
        }
    }

    fn txn(
        id: &str,
        account_id: &str,
        security_id: &str,
        on: &str,
        action: InvestmentAction,
        quantity: f64,
        amount: f64,
    ) -> Transaction {
        Transaction {
            id: id.to_string(),
            account_id: account_id.to_string(),
            date: on.to_string(),
            amount: Some(amount),
            payee: None,
            memo: None,
            number: None,
            cleared: None,
            category: None,
            cash_balance: 0.0,
            detail: TransactionDetail::Investment(InvestmentDetail {
                action,
                security_id: Some(security_id.to_string()),
                quantity: Some(quantity),
                price: None,
                commission: None,
            }),
        }
    }

    struct Fixture {
        accounts: Vec<Account>,
        securities: Vec<Security>,
        transactions: Vec<Transaction>,
        prices: Vec<Price>,
        outcome: LedgerOutcome,
    }

    impl Fixture {
        fn new(mut transactions: Vec<Transaction>, prices: Vec<Price>) -> Self {
            let accounts = vec![account("acc", "Brokerage"), account("ira", "Retirement")];
            let securities = vec![security("apl", "apl"), security("msft", "msft")];
            apply_running_balances(&mut transactions);
            let index = PriceIndex::new(&prices);
            let outcome = LotLedger::new(&accounts, &securities, &index)
                .replay(&transactions)
                .unwrap();
            Self {
                accounts,
                securities,
                transactions,
                prices,
                outcome,
            }
        }

        fn holdings(&self, query: &HoldingsQuery) -> Vec<Holding> {
            let inputs = HoldingsInputs {
                lots: &self.outcome.lots,
                allocations: &self.outcome.allocations,
                prices: &self.prices,
                accounts: &self.accounts,
                securities: &self.securities,
                transactions: &self.transactions,
            };
            compute_holdings_as_of(&inputs, query)
        }

        fn securities_at(&self, on: &str) -> Vec<Holding> {
            self.holdings(&HoldingsQuery::new(date(on)).with_cash(false))
        }
    }

    #[test]
    fn test_time_travel_across_full_sale() {
        let fixture = Fixture::new(
            vec![
                txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1502.5),
                txn("t2", "acc", "apl", "2024-03-01", InvestmentAction::Sell, 10.0, 1700.0),
            ],
            vec![],
        );

        assert!(fixture.securities_at("2024-01-10").is_empty());

        let february = fixture.securities_at("2024-02-15");
        assert_eq!(february.len(), 1);
        assert!((february[0].quantity - 10.0).abs() < 1e-9);
        assert!((february[0].cost_basis - 1502.5).abs() < 1e-9);

        assert!(fixture.securities_at("2024-03-01").is_empty());
        assert!(fixture.securities_at("2024-03-15").is_empty());
    }

    #[test]
    fn test_time_travel_across_partial_sale() {
        let fixture = Fixture::new(
            vec![
                txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1502.5),
                txn("t2", "acc", "apl", "2024-03-01", InvestmentAction::Sell, 4.0, 680.0),
            ],
            vec![],
        );

        let before = fixture.securities_at("2024-02-15");
        assert!((before[0].quantity - 10.0).abs() < 1e-9);
        assert!((before[0].avg_cost_per_share - 150.25).abs() < 1e-9);

        let after = fixture.securities_at("2024-03-15");
        assert!((after[0].quantity - 6.0).abs() < 1e-9);
        assert!((after[0].cost_basis - 901.5).abs() < 1e-9);
    }

    #[test]
    fn test_split_after_partial_sale_matches_ledger() {
        let fixture = Fixture::new(
            vec![
                txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1000.0),
                txn("t2", "acc", "apl", "2024-03-01", InvestmentAction::Sell, 4.0, 440.0),
                txn("t3", "acc", "apl", "2024-03-15", InvestmentAction::StkSplit, 20.0, 0.0),
            ],
            vec![],
        );

        let holdings = fixture.securities_at("2024-04-01");
        assert_eq!(holdings.len(), 1);
        assert!((holdings[0].quantity - 12.0).abs() < 1e-9);
        assert!((holdings[0].quantity - fixture.outcome.lots[0].remaining_quantity).abs() < 1e-9);
        assert!((holdings[0].cost_basis - 600.0).abs() < 1e-9);
        assert!((holdings[0].avg_cost_per_share - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_join_day_gain_and_staleness() {
        let fixture = Fixture::new(
            vec![txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1500.0)],
            vec![
                price("apl", "2024-01-15", 150.0),
                price("apl", "2024-02-14", 155.0),
                price("apl", "2024-02-15", 160.0),
            ],
        );

        let fresh = fixture.securities_at("2024-02-15");
        assert_eq!(fresh[0].price, Some(160.0));
        assert_eq!(fresh[0].price_date.as_deref(), Some("2024-02-15"));
        assert!((fresh[0].market_value - 1600.0).abs() < 1e-9);
        assert!((fresh[0].unrealized_gain_loss - 100.0).abs() < 1e-9);
        assert!((fresh[0].unrealized_gain_loss_pct - 100.0 / 15.0).abs() < 1e-9);
        assert!((fresh[0].day_gain_loss - 50.0).abs() < 1e-9);
        assert!(!fresh[0].is_stale);

        let next_day = fixture.securities_at("2024-02-16");
        assert!(!next_day[0].is_stale);

        let later = fixture.securities_at("2024-03-15");
        assert_eq!(later[0].price, Some(160.0));
        assert!(later[0].is_stale);
        assert_eq!(later[0].day_gain_loss, 0.0);

        let relaxed = fixture.holdings(
            &HoldingsQuery::new(date("2024-03-15"))
                .with_cash(false)
                .with_stale_after_days(60),
        );
        assert!(!relaxed[0].is_stale);
    }

    #[test]
    fn test_missing_price_falls_back_to_cost() {
        let fixture = Fixture::new(
            vec![txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1500.0)],
            vec![],
        );
        let holdings = fixture.securities_at("2024-02-15");
        assert_eq!(holdings[0].price, None);
        assert!((holdings[0].market_value - 1500.0).abs() < 1e-9);
        assert_eq!(holdings[0].unrealized_gain_loss, 0.0);
        assert!(holdings[0].is_stale);
    }

    #[test]
    fn test_cash_holding_uses_running_balance() {
        let fixture = Fixture::new(
            vec![
                txn("t0", "acc", "apl", "2024-01-01", InvestmentAction::ContribX, 0.0, 2000.0),
                txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1500.0),
                txn("t2", "acc", "apl", "2024-03-01", InvestmentAction::Sell, 4.0, 680.0),
            ],
            vec![],
        );

        let holdings = fixture.holdings(&HoldingsQuery::new(date("2024-02-15")));
        assert_eq!(holdings.len(), 2);
        let cash = holdings.iter().find(|h| h.is_cash).unwrap();
        assert!((cash.market_value - 500.0).abs() < 1e-9);
        assert_eq!(cash.account_name, "Brokerage");

        let holdings = fixture.holdings(&HoldingsQuery::new(date("2024-03-15")));
        let cash = holdings.iter().find(|h| h.is_cash).unwrap();
        assert!((cash.market_value - 1180.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_apply_before_percentages() {
        let fixture = Fixture::new(
            vec![
                txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::Buy, 10.0, -1000.0),
                txn("t2", "acc", "msft", "2024-01-15", InvestmentAction::Buy, 10.0, -3000.0),
                txn("t3", "ira", "msft", "2024-01-15", InvestmentAction::Buy, 5.0, -1500.0),
            ],
            vec![],
        );

        let all = fixture.securities_at("2024-02-01");
        assert_eq!(all.len(), 3);
        let pct: f64 = all.iter().map(|h| h.market_value_pct).sum();
        assert!((pct - 100.0).abs() < 1e-9);
        assert!((all[0].market_value_pct - 1000.0 / 5500.0 * 100.0).abs() < 1e-9);

        let msft = fixture.holdings(
            &HoldingsQuery::new(date("2024-02-01"))
                .with_cash(false)
                .with_filter("MSFT"),
        );
        assert_eq!(msft.len(), 2);
        assert!((msft[0].market_value_pct - 3000.0 / 4500.0 * 100.0).abs() < 1e-9);

        let ira = fixture.holdings(
            &HoldingsQuery::new(date("2024-02-01"))
                .with_cash(false)
                .with_accounts(vec!["ira".to_string()]),
        );
        assert_eq!(ira.len(), 1);
        assert_eq!(ira[0].account_name, "Retirement");
        assert!((ira[0].market_value_pct - 100.0).abs() < 1e-9);

        let by_account_name = fixture.holdings(
            &HoldingsQuery::new(date("2024-02-01"))
                .with_cash(false)
                .with_filter("retire"),
        );
        assert_eq!(by_account_name.len(), 1);
    }

    #[test]
    fn test_short_position_is_negative() {
        let fixture = Fixture::new(
            vec![txn("t1", "acc", "apl", "2024-01-15", InvestmentAction::ShtSell, 5.0, 850.0)],
            vec![price("apl", "2024-02-01", 160.0)],
        );
        let holdings = fixture.securities_at("2024-02-01");
        assert!((holdings[0].quantity + 5.0).abs() < 1e-9);
        assert!((holdings[0].cost_basis + 850.0).abs() < 1e-9);
        assert!((holdings[0].market_value + 800.0).abs() < 1e-9);
        assert!((holdings[0].unrealized_gain_loss - 50.0).abs() < 1e-9);
    }
}

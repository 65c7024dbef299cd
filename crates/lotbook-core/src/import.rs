//! Persists classified QIF entries
//!
//! Ids are content hashes, so importing the same file twice writes the same
//! rows again. Accounts and securities are matched by name; a repeat that
//! contradicts an attribute already stored is rejected.

use log::{debug, info, warn};
use lotbook_parser::{
    AccountEntry, BankTransactionEntry, InvestmentAction, InvestmentTransactionEntry, ParsedQif,
    SecurityEntry,
};
use lotbook_utils::{content_hash, normalize_number};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::ledger::{log_replay, LotImportSummary, LotLedger};
use crate::models::{Account, InvestmentDetail, Price, Security, Transaction, TransactionDetail};
use crate::prices::PriceIndex;
use crate::store::{ImportRows, LedgerStore};
use crate::time::format_date;

/// Counts reported after an entry import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryImportSummary {
    pub accounts_added: usize,
    pub securities_added: usize,
    /// Securities created only because a transaction named them
    pub securities_auto_registered: usize,
    pub transactions_added: usize,
    pub transactions_updated: usize,
    pub prices: usize,
    pub prices_skipped: usize,
}

pub fn account_id(name: &str) -> String {
    content_hash(&["account", name])
}

pub fn security_id(name: &str) -> String {
    content_hash(&["security", name])
}

pub fn price_id(security_id: &str, date: &str) -> String {
    content_hash(&["price", security_id, date])
}

fn to_f64(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|d| d.to_f64())
}

fn number_key(value: Option<f64>) -> String {
    value.map(normalize_number).unwrap_or_default()
}

/// Cash moved into (positive) or out of the account by a transaction
pub fn cash_effect(txn: &Transaction) -> f64 {
    let amount = txn.amount.unwrap_or(0.0);
    let detail = match &txn.detail {
        TransactionDetail::Bank { .. } => return amount,
        TransactionDetail::Investment(detail) => detail,
    };

    use InvestmentAction::*;
    match detail.action {
        Buy | CvrShrt => -amount.abs(),
        Sell | ShtSell => amount.abs(),
        Div | IntInc | MiscInc | CGShort | CGMid | CGLong | RtrnCap => amount.abs(),
        MiscExp | MargInt => -amount.abs(),
        Cash => amount,
        ContribX | XIn => amount.abs(),
        WithdrwX | XOut => -amount.abs(),
        // X-suffixed actions settle in another account; share-only actions move no cash
        BuyX | SellX | DivX | IntIncX | MiscIncX | MiscExpX | MargIntX | CGShortX | CGMidX
        | CGLongX | RtrnCapX | ShrsIn | ShrsOut | ReinvDiv | ReinvInt | ReinvLg | ReinvSh
        | ReinvMd | StkSplit | StkDiv | Grant | Vest | Exercise | Expire | Reminder => 0.0,
    }
}

/// Check `candidate` against the stored row of the same name and fill gaps.
/// Returns whether the stored row gained information.
fn reconcile<T: PartialEq + Clone>(
    stored: &mut Option<T>,
    candidate: &Option<T>,
    field: &str,
    conflict: impl Fn(&str) -> CoreError,
) -> CoreResult<bool> {
    match (stored.as_ref(), candidate) {
        (Some(a), Some(b)) if a != b => Err(conflict(field)),
        (None, Some(b)) => {
            *stored = Some(b.clone());
            Ok(true)
        }
        _ => Ok(false),
    }
}

struct Importer<'a> {
    parsed: &'a ParsedQif,
    accounts: BTreeMap<String, Account>,
    securities: BTreeMap<String, Security>,
    changed_accounts: BTreeMap<String, Account>,
    changed_securities: BTreeMap<String, Security>,
    summary: EntryImportSummary,
}

impl<'a> Importer<'a> {
    fn merge_account(&mut self, entry: &AccountEntry) -> CoreResult<()> {
        let candidate = Account {
            id: account_id(&entry.name),
            name: entry.name.clone(),
            account_type: entry.account_type.clone(),
            description: entry.description.clone(),
            credit_limit: to_f64(entry.credit_limit),
        };

        let Some(stored) = self.accounts.get_mut(&entry.name) else {
            debug!("New account '{}'", candidate.name);
            self.summary.accounts_added += 1;
            self.changed_accounts.insert(candidate.name.clone(), candidate.clone());
            self.accounts.insert(candidate.name.clone(), candidate);
            return Ok(());
        };

        let name = entry.name.clone();
        let conflict = |field: &str| CoreError::AccountConflict {
            name: name.clone(),
            field: field.to_string(),
        };
        let mut changed = reconcile(&mut stored.account_type, &candidate.account_type, "type", conflict)?;
        changed |= reconcile(&mut stored.description, &candidate.description, "description", conflict)?;
        changed |= reconcile(&mut stored.credit_limit, &candidate.credit_limit, "credit limit", conflict)?;
        if changed {
            self.changed_accounts.insert(stored.name.clone(), stored.clone());
        }
        Ok(())
    }

    fn merge_security(&mut self, entry: &SecurityEntry) -> CoreResult<()> {
        let candidate = Security {
            id: security_id(&entry.name),
            name: entry.name.clone(),
            symbol: entry.symbol.clone(),
            security_type: entry.security_type.clone(),
            goal: entry.goal.clone(),
        };

        let Some(stored) = self.securities.get_mut(&entry.name) else {
            debug!("New security '{}'", candidate.name);
            self.summary.securities_added += 1;
            self.changed_securities.insert(candidate.name.clone(), candidate.clone());
            self.securities.insert(candidate.name.clone(), candidate);
            return Ok(());
        };

        let name = entry.name.clone();
        let conflict = |field: &str| CoreError::SecurityConflict {
            name: name.clone(),
            field: field.to_string(),
        };
        let mut changed = reconcile(&mut stored.symbol, &candidate.symbol, "symbol", conflict)?;
        changed |= reconcile(&mut stored.security_type, &candidate.security_type, "type", conflict)?;
        changed |= reconcile(&mut stored.goal, &candidate.goal, "goal", conflict)?;
        if changed {
            self.changed_securities.insert(stored.name.clone(), stored.clone());
        }
        Ok(())
    }

    /// Securities named by transactions but never declared get a bare row
    fn register_referenced_securities(&mut self) {
        for txn in &self.parsed.investment_transactions {
            let Some(name) = txn.security.as_ref() else {
                continue;
            };
            if self.securities.contains_key(name) {
                continue;
            }
            warn!("Security '{}' is not declared; registering it by name", name);
            let security = Security {
                id: security_id(name),
                name: name.clone(),
                symbol: None,
                security_type: None,
                goal: None,
            };
            self.summary.securities_added += 1;
            self.summary.securities_auto_registered += 1;
            self.changed_securities.insert(name.clone(), security.clone());
            self.securities.insert(name.clone(), security);
        }
    }

    fn account_for(&self, name: &Option<String>) -> CoreResult<String> {
        let name = name.as_deref().unwrap_or_default();
        self.accounts
            .get(name)
            .map(|a| a.id.clone())
            .ok_or_else(|| CoreError::NotFound {
                kind: "account".to_string(),
                id: name.to_string(),
                transaction_id: "(import)".to_string(),
            })
    }

    fn bank_transaction(&self, entry: &BankTransactionEntry) -> CoreResult<(String, Transaction)> {
        let account_id = self.account_for(&entry.account)?;
        let date = format_date(entry.date);
        let amount = to_f64(entry.amount);
        let category = entry
            .category
            .clone()
            .or_else(|| entry.transfer_account.as_ref().map(|t| format!("[{}]", t)));

        let key = content_hash(&[
            "bank",
            &account_id,
            &date,
            &number_key(amount),
            entry.payee.as_deref().unwrap_or_default(),
            entry.memo.as_deref().unwrap_or_default(),
            entry.number.as_deref().unwrap_or_default(),
        ]);

        Ok((
            key,
            Transaction {
                id: String::new(),
                account_id,
                date,
                amount,
                payee: entry.payee.clone(),
                memo: entry.memo.clone(),
                number: entry.number.clone(),
                cleared: entry.cleared.clone(),
                category,
                cash_balance: 0.0,
                detail: TransactionDetail::Bank {
                    register: entry.transaction_type.to_string(),
                },
            },
        ))
    }

    fn investment_transaction(
        &self,
        entry: &InvestmentTransactionEntry,
    ) -> CoreResult<(String, Transaction)> {
        let account_id = self.account_for(&entry.account)?;
        let date = format_date(entry.date);
        let security_id = entry
            .security
            .as_ref()
            .and_then(|name| self.securities.get(name))
            .map(|s| s.id.clone());
        let detail = InvestmentDetail {
            action: entry.action,
            security_id,
            quantity: to_f64(entry.quantity),
            price: to_f64(entry.price),
            commission: to_f64(entry.commission),
        };
        let amount = to_f64(entry.amount);

        let key = content_hash(&[
            "investment",
            &account_id,
            &date,
            detail.action.as_str(),
            detail.security_id.as_deref().unwrap_or_default(),
            &number_key(detail.quantity),
            &number_key(detail.price),
            &number_key(amount),
            entry.memo.as_deref().unwrap_or_default(),
        ]);

        Ok((
            key,
            Transaction {
                id: String::new(),
                account_id,
                date,
                amount,
                payee: entry.payee.clone(),
                memo: entry.memo.clone(),
                number: None,
                cleared: entry.cleared.clone(),
                category: entry.transfer_account.as_ref().map(|t| format!("[{}]", t)),
                cash_balance: 0.0,
                detail: TransactionDetail::Investment(detail),
            },
        ))
    }

    /// Build transaction rows, numbering identical keys `-0`, `-1`, ...
    fn transactions(&self) -> CoreResult<Vec<Transaction>> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut rows = Vec::with_capacity(self.parsed.transaction_count());

        let bank = self
            .parsed
            .bank_transactions
            .iter()
            .map(|e| self.bank_transaction(e));
        let investment = self
            .parsed
            .investment_transactions
            .iter()
            .map(|e| self.investment_transaction(e));

        for built in bank.chain(investment) {
            let (key, mut txn) = built?;
            let n = seen.entry(key.clone()).or_insert(0);
            txn.id = format!("{}-{}", key, n);
            *n += 1;
            rows.push(txn);
        }
        Ok(rows)
    }

    fn prices(&mut self) -> Vec<Price> {
        let by_symbol: HashMap<&str, &Security> = self
            .securities
            .values()
            .flat_map(|s| {
                let mut keys = vec![(s.name.as_str(), s)];
                if let Some(symbol) = s.symbol.as_deref() {
                    keys.push((symbol, s));
                }
                keys
            })
            .collect();

        let mut prices = Vec::new();
        for entry in &self.parsed.prices {
            let Some(security) = by_symbol.get(entry.symbol.as_str()) else {
                warn!("Skipping price for unknown symbol '{}'", entry.symbol);
                self.summary.prices_skipped += 1;
                continue;
            };
            let Some(price) = entry.price.to_f64() else {
                self.summary.prices_skipped += 1;
                continue;
            };
            let date = format_date(entry.date);
            prices.push(Price {
                id: price_id(&security.id, &date),
                security_id: security.id.clone(),
                date,
                price,
            });
        }
        self.summary.prices = prices.len();
        prices
    }
}

/// Recompute every account's running cash balance in `(date, id)` order
pub fn apply_running_balances(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    let mut balances: HashMap<String, f64> = HashMap::new();
    for txn in transactions.iter_mut() {
        let balance = balances.entry(txn.account_id.clone()).or_insert(0.0);
        *balance += cash_effect(txn);
        txn.cash_balance = *balance;
    }
}

/// Rows one import will write, and the store contents after it lands
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub rows: ImportRows,
    pub summary: EntryImportSummary,
    pub accounts: Vec<Account>,
    pub securities: Vec<Security>,
    /// Stored and imported transactions with running balances applied
    pub transactions: Vec<Transaction>,
    pub prices: Vec<Price>,
}

/// Reconcile a parse result against the store without writing anything
pub fn plan_import<S: LedgerStore + ?Sized>(
    store: &S,
    parsed: &ParsedQif,
) -> CoreResult<ImportPlan> {
    let mut importer = Importer {
        parsed,
        accounts: store
            .accounts()?
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect(),
        securities: store
            .securities()?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect(),
        changed_accounts: BTreeMap::new(),
        changed_securities: BTreeMap::new(),
        summary: EntryImportSummary::default(),
    };

    for account in &parsed.accounts {
        importer.merge_account(account)?;
    }
    for security in &parsed.securities {
        importer.merge_security(security)?;
    }
    importer.register_referenced_securities();

    let new_transactions = importer.transactions()?;
    let new_prices = importer.prices();

    let existing = store.transactions()?;
    let stored_balance: HashMap<String, f64> =
        existing.iter().map(|t| (t.id.clone(), t.cash_balance)).collect();
    let imported_ids: HashSet<String> = new_transactions.iter().map(|t| t.id.clone()).collect();

    let mut merged: BTreeMap<String, Transaction> =
        existing.into_iter().map(|t| (t.id.clone(), t)).collect();
    for txn in new_transactions {
        if stored_balance.contains_key(&txn.id) {
            importer.summary.transactions_updated += 1;
        } else {
            importer.summary.transactions_added += 1;
        }
        merged.insert(txn.id.clone(), txn);
    }

    let mut all: Vec<Transaction> = merged.into_values().collect();
    apply_running_balances(&mut all);

    // Rewrite this import's rows and any older row whose balance moved
    let transactions = all
        .iter()
        .filter(|t| {
            imported_ids.contains(&t.id) || stored_balance.get(&t.id) != Some(&t.cash_balance)
        })
        .cloned()
        .collect();

    let mut prices: BTreeMap<String, Price> =
        store.prices()?.into_iter().map(|p| (p.id.clone(), p)).collect();
    for price in &new_prices {
        prices.insert(price.id.clone(), price.clone());
    }

    Ok(ImportPlan {
        rows: ImportRows {
            accounts: importer.changed_accounts.into_values().collect(),
            securities: importer.changed_securities.into_values().collect(),
            transactions,
            prices: new_prices,
        },
        summary: importer.summary,
        accounts: importer.accounts.into_values().collect(),
        securities: importer.securities.into_values().collect(),
        transactions: all,
        prices: prices.into_values().collect(),
    })
}

fn log_import(summary: &EntryImportSummary) {
    info!(
        "Imported {} new accounts, {} new securities, {} new transactions, {} prices",
        summary.accounts_added,
        summary.securities_added,
        summary.transactions_added,
        summary.prices
    );
}

/// Persist a parse result in one store transaction, leaving the lot ledger alone
pub fn import_entries<S: LedgerStore + ?Sized>(
    store: &mut S,
    parsed: &ParsedQif,
) -> CoreResult<EntryImportSummary> {
    let plan = plan_import(&*store, parsed)?;
    store.import_rows(&plan.rows)?;
    log_import(&plan.summary);
    Ok(plan.summary)
}

/// Outcome of importing one QIF document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub entries: EntryImportSummary,
    pub lots: LotImportSummary,
}

/// Import a parse result and rebuild the lot ledger.
///
/// The replay runs over the post-import rows in memory; nothing is written
/// unless it succeeds, and then rows and lots land in one store transaction.
pub fn import_parsed<S: LedgerStore + ?Sized>(
    store: &mut S,
    parsed: &ParsedQif,
) -> CoreResult<ImportReport> {
    let plan = plan_import(&*store, parsed)?;
    let prices = PriceIndex::new(&plan.prices);
    let outcome =
        LotLedger::new(&plan.accounts, &plan.securities, &prices).replay(&plan.transactions)?;

    store.commit_import(&plan.rows, &outcome.lots, &outcome.allocations)?;
    log_import(&plan.summary);
    log_replay(&outcome.summary);
    Ok(ImportReport {
        entries: plan.summary,
        lots: outcome.summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    const SAMPLE: &str = r#"!Account
NBrokerage
TInvst
^
!Type:Security
NAPL
SAPL
TStock
^
!Account
NBrokerage
TInvst
^
!Type:Invst
D1/15'24
NContribX
T2,000.00
^
D1/15'24
NBuy
YAPL
I150.25
Q10
T1,502.50
^
D2/1'24
NDiv
YAPL
T5.00
^
D3/1'24
NSell
YAPL
I170.00
Q4
T680.00
^
!Type:Prices
"APL",150.25," 1/15'24"
"ZZZ",1.00," 1/15'24"
^
"#;

    fn import(store: &mut SqliteStore, text: &str) -> CoreResult<EntryImportSummary> {
        let parsed = lotbook_parser::parse(text)?;
        import_entries(store, &parsed)
    }

    #[test]
    fn test_import_rows_and_balances() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let summary = import(&mut store, SAMPLE).unwrap();

        assert_eq!(summary.accounts_added, 1);
        assert_eq!(summary.securities_added, 1);
        assert_eq!(summary.transactions_added, 4);
        assert_eq!(summary.prices, 1);
        assert_eq!(summary.prices_skipped, 1);

        let txns = store.transactions().unwrap();
        let last = txns.last().unwrap();
        assert_eq!(last.date, "2024-03-01");
        assert!((last.cash_balance - (2000.0 - 1502.5 + 5.0 + 680.0)).abs() < 1e-9);
        assert!(txns.iter().all(|t| t.id.ends_with("-0")));
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, SAMPLE).unwrap();
        let before = store.transactions().unwrap();

        let summary = import(&mut store, SAMPLE).unwrap();
        assert_eq!(summary.accounts_added, 0);
        assert_eq!(summary.transactions_added, 0);
        assert_eq!(summary.transactions_updated, 4);
        assert_eq!(store.transactions().unwrap(), before);
        assert_eq!(store.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_identical_transactions_get_suffixes() {
        let text = "!Account\nNChecking\nTBank\n^\n!Type:Bank\nD1/1'24\nT-5.00\nPCafe\n^\nD1/1'24\nT-5.00\nPCafe\n^\n";
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, text).unwrap();
        let ids: Vec<String> = store.transactions().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].ends_with("-0"));
        assert!(ids[1].ends_with("-1"));
        assert_eq!(ids[0].trim_end_matches("-0"), ids[1].trim_end_matches("-1"));
    }

    #[test]
    fn test_account_conflict() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, "!Account\nNChecking\nTBank\n^\n").unwrap();
        let err = import(&mut store, "!Account\nNChecking\nTCCard\n^\n").unwrap_err();
        match err {
            CoreError::AccountConflict { name, field } => {
                assert_eq!(name, "Checking");
                assert_eq!(field, "type");
            }
            other => panic!("Expected AccountConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_compatible_account_fills_gaps() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, "!Account\nNChecking\n^\n").unwrap();
        import(&mut store, "!Account\nNChecking\nTBank\nDMain account\n^\n").unwrap();
        let accounts = store.accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account_type.as_deref(), Some("Bank"));
        assert_eq!(accounts[0].id, account_id("Checking"));
    }

    #[test]
    fn test_security_conflict() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, "!Type:Security\nNApple\nSAAPL\n^\n").unwrap();
        let err = import(&mut store, "!Type:Security\nNApple\nSAPL\n^\n").unwrap_err();
        assert!(matches!(err, CoreError::SecurityConflict { .. }));
    }

    #[test]
    fn test_undeclared_security_is_registered() {
        let text = "!Type:Security\nNAPL\n^\n!Account\nNBrokerage\nTInvst\n^\n!Type:Invst\nD1/15'24\nNBuy\nYMSFT\nQ1\nT-300\n^\n";
        let mut store = SqliteStore::open_in_memory().unwrap();
        let summary = import(&mut store, text).unwrap();
        assert_eq!(summary.securities_auto_registered, 1);
        let names: Vec<String> = store.securities().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["APL".to_string(), "MSFT".to_string()]);
        let txn = &store.transactions().unwrap()[0];
        assert_eq!(
            txn.investment().unwrap().security_id,
            Some(security_id("MSFT"))
        );
    }

    #[test]
    fn test_cash_effect_signs() {
        let txn = |action: InvestmentAction, amount: f64| Transaction {
            id: "t".to_string(),
            account_id: "a".to_string(),
            date: "2024-01-01".to_string(),
            amount: Some(amount),
            payee: None,
            memo: None,
            number: None,
            cleared: None,
            category: None,
            cash_balance: 0.0,
            detail: TransactionDetail::Investment(InvestmentDetail {
                action,
                security_id: None,
                quantity: None,
                price: None,
                commission: None,
            }),
        };
        assert_eq!(cash_effect(&txn(InvestmentAction::Buy, 100.0)), -100.0);
        assert_eq!(cash_effect(&txn(InvestmentAction::Sell, -100.0)), 100.0);
        assert_eq!(cash_effect(&txn(InvestmentAction::MargInt, 3.0)), -3.0);
        assert_eq!(cash_effect(&txn(InvestmentAction::BuyX, 100.0)), 0.0);
        assert_eq!(cash_effect(&txn(InvestmentAction::Cash, -25.0)), -25.0);
    }
}

//! FIFO lot ledger
//!
//! Replays every investment transaction in `(date, id)` order and rebuilds
//! the full set of lots and allocations from scratch. Lots of one
//! `(account, security)` pair are consumed oldest first. A sale that runs out
//! of long lots opens a short lot (negative quantity and cost basis), and a
//! purchase covers open short lots before it opens a long one.
//!
//! A stock split rescales only the unconsumed part of each open lot, so
//! `quantity` stays equal to the shares already allocated plus the remaining
//! shares. Known limitations: as-of views before a split see post-split share
//! counts, and an option exercise reduces lots without writing allocations.

use log::{debug, info, warn};
use lotbook_parser::InvestmentAction;
use lotbook_utils::content_hash;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::models::{
    is_zero, Account, InvestmentDetail, Lot, LotAllocation, Security, Transaction, EPSILON,
};
use crate::prices::PriceIndex;
use crate::store::LedgerStore;

/// Counts reported after a ledger replay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotImportSummary {
    /// Investment transactions replayed
    pub transactions: usize,
    pub lots_created: usize,
    pub lots_open: usize,
    pub allocations: usize,
    /// Reinvestments dropped because no cost basis could be found
    pub skipped: usize,
}

/// Result of a full replay
#[derive(Debug, Clone, Default)]
pub struct LedgerOutcome {
    pub lots: Vec<Lot>,
    pub allocations: Vec<LotAllocation>,
    pub summary: LotImportSummary,
}

pub fn lot_id(transaction_id: &str) -> String {
    content_hash(&["lot", transaction_id])
}

pub fn allocation_id(lot_id: &str, transaction_id: &str) -> String {
    content_hash(&["allocation", lot_id, transaction_id])
}

/// How an action affects lots
enum LotRule {
    CashOnly,
    BuyLike,
    SellLike,
    Reinvest,
    Split,
    Grant,
    Exercise,
    Unhandled,
}

fn lot_rule(action: InvestmentAction) -> LotRule {
    use InvestmentAction::*;
    match action {
        Div | DivX | IntInc | MiscInc | MiscIncX | MiscExp | MargInt | Cash | CGShort | CGLong
        | ContribX | WithdrwX | RtrnCapX | Reminder | Expire | XOut | XIn => LotRule::CashOnly,
        Buy | BuyX | CvrShrt | ShrsIn => LotRule::BuyLike,
        Sell | SellX | ShtSell | ShrsOut => LotRule::SellLike,
        ReinvDiv | ReinvInt | ReinvLg | ReinvSh | ReinvMd => LotRule::Reinvest,
        StkSplit => LotRule::Split,
        Grant | Vest => LotRule::Grant,
        Exercise => LotRule::Exercise,
        IntIncX | MiscExpX | MargIntX | RtrnCap | CGMid | CGShortX | CGLongX | CGMidX | StkDiv => {
            LotRule::Unhandled
        }
    }
}

/// Which side of the book a reduction draws from
#[derive(Clone, Copy, PartialEq)]
enum Side {
    Long,
    Short,
}

/// Lot state built up during one replay
pub struct LotLedger<'a> {
    accounts: HashSet<String>,
    securities: HashSet<String>,
    prices: &'a PriceIndex,
    lots: Vec<Lot>,
    /// Cost basis already drawn from each lot, parallel to `lots`
    consumed_cost: Vec<f64>,
    /// Lot indices per `(account, security)`, oldest first
    by_pair: HashMap<(String, String), Vec<usize>>,
    allocations: Vec<LotAllocation>,
    replayed: usize,
    skipped: usize,
}

impl<'a> LotLedger<'a> {
    pub fn new(accounts: &[Account], securities: &[Security], prices: &'a PriceIndex) -> Self {
        Self {
            accounts: accounts.iter().map(|a| a.id.clone()).collect(),
            securities: securities.iter().map(|s| s.id.clone()).collect(),
            prices,
            lots: Vec::new(),
            consumed_cost: Vec::new(),
            by_pair: HashMap::new(),
            allocations: Vec::new(),
            replayed: 0,
            skipped: 0,
        }
    }

    /// Replay transactions in `(date, id)` order; bank transactions are ignored
    pub fn replay(mut self, transactions: &[Transaction]) -> CoreResult<LedgerOutcome> {
        let mut ordered: Vec<&Transaction> =
            transactions.iter().filter(|t| t.investment().is_some()).collect();
        ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        for txn in ordered {
            self.apply(txn)?;
        }
        Ok(self.finish())
    }

    /// Apply one investment transaction
    pub fn apply(&mut self, txn: &Transaction) -> CoreResult<()> {
        let Some(detail) = txn.investment() else {
            return Ok(());
        };
        if !self.accounts.contains(&txn.account_id) {
            return Err(CoreError::NotFound {
                kind: "account".to_string(),
                id: txn.account_id.clone(),
                transaction_id: txn.id.clone(),
            });
        }
        self.replayed += 1;

        let rule = lot_rule(detail.action);
        match rule {
            LotRule::CashOnly => {
                debug!("{} {}: no lot change", txn.id, detail.action);
                return Ok(());
            }
            LotRule::Unhandled => {
                return Err(CoreError::UnhandledInvestmentAction {
                    action: detail.action.to_string(),
                    transaction_id: txn.id.clone(),
                });
            }
            _ => {}
        }

        let security_id = self.security_for(txn, detail)?;
        let quantity = detail.quantity.unwrap_or(0.0);
        let pair = (txn.account_id.clone(), security_id);

        match rule {
            LotRule::BuyLike => self.buy(txn, detail, &pair, quantity.abs()),
            LotRule::SellLike => self.sell(txn, detail, &pair, quantity.abs()),
            LotRule::Reinvest if quantity <= 0.0 => self.sell(txn, detail, &pair, quantity.abs()),
            LotRule::Reinvest => self.reinvest(txn, detail, &pair, quantity),
            LotRule::Split => self.split(txn, &pair, quantity / 10.0),
            LotRule::Grant => {
                if quantity > EPSILON {
                    self.open_lot(txn, &pair, quantity, 0.0);
                }
            }
            LotRule::Exercise => {
                self.reduce(txn, &pair, Side::Long, quantity.abs(), false);
            }
            LotRule::CashOnly | LotRule::Unhandled => {}
        }
        Ok(())
    }

    fn security_for(&self, txn: &Transaction, detail: &InvestmentDetail) -> CoreResult<String> {
        match &detail.security_id {
            Some(id) if self.securities.contains(id) => Ok(id.clone()),
            other => Err(CoreError::NotFound {
                kind: "security".to_string(),
                id: other.clone().unwrap_or_else(|| "(none)".to_string()),
                transaction_id: txn.id.clone(),
            }),
        }
    }

    /// Per-share value of a trade: `|amount| / qty`, else price plus commission per share
    fn per_share(detail: &InvestmentDetail, amount: Option<f64>, quantity: f64) -> f64 {
        if is_zero(quantity) {
            return 0.0;
        }
        match amount {
            Some(amount) if amount.abs() > EPSILON => amount.abs() / quantity,
            _ => match detail.price {
                Some(price) => price + detail.commission.unwrap_or(0.0) / quantity,
                None => 0.0,
            },
        }
    }

    fn buy(&mut self, txn: &Transaction, detail: &InvestmentDetail, pair: &(String, String), qty: f64) {
        if is_zero(qty) {
            debug!("{} {}: zero quantity", txn.id, detail.action);
            return;
        }
        let leftover = self.reduce(txn, pair, Side::Short, qty, true);
        if leftover > EPSILON {
            let per_share = Self::per_share(detail, txn.amount, qty);
            self.open_lot(txn, pair, leftover, per_share * leftover);
        }
    }

    fn sell(&mut self, txn: &Transaction, detail: &InvestmentDetail, pair: &(String, String), qty: f64) {
        if is_zero(qty) {
            debug!("{} {}: zero quantity", txn.id, detail.action);
            return;
        }
        let leftover = self.reduce(txn, pair, Side::Long, qty, true);
        if leftover > EPSILON {
            let per_share = Self::per_share(detail, txn.amount, qty);
            self.open_lot(txn, pair, -leftover, -(per_share * leftover));
        }
    }

    fn reinvest(
        &mut self,
        txn: &Transaction,
        detail: &InvestmentDetail,
        pair: &(String, String),
        qty: f64,
    ) {
        let cost = match (txn.amount, detail.price) {
            (Some(amount), _) if amount.abs() > EPSILON => Some(amount.abs()),
            (_, Some(price)) if price.abs() > EPSILON => Some(price * qty),
            _ => self
                .prices
                .latest_at_or_before(&pair.1, &txn.date)
                .map(|(_, price)| price * qty),
        };

        match cost {
            Some(cost) => self.open_lot(txn, pair, qty, cost),
            None => {
                warn!(
                    "Skipping {} {}: no amount, price or historical price for cost basis",
                    txn.id, detail.action
                );
                self.skipped += 1;
            }
        }
    }

    fn split(&mut self, txn: &Transaction, pair: &(String, String), ratio: f64) {
        if ratio <= EPSILON {
            debug!("{} StkSplit: ratio {} ignored", txn.id, ratio);
            return;
        }
        let Some(indices) = self.by_pair.get(pair) else {
            return;
        };
        for &idx in indices {
            let lot = &mut self.lots[idx];
            if lot.is_open() {
                let allocated = lot.quantity - lot.remaining_quantity;
                lot.remaining_quantity *= ratio;
                lot.quantity = allocated + lot.remaining_quantity;
            }
        }
        debug!("{} StkSplit: open lots scaled by {}", txn.id, ratio);
    }

    /// Draw `shares` FIFO from open lots on `side`. Returns the shares that
    /// could not be matched.
    fn reduce(
        &mut self,
        txn: &Transaction,
        pair: &(String, String),
        side: Side,
        shares: f64,
        record: bool,
    ) -> f64 {
        let mut remaining = shares;
        let indices = self.by_pair.get(pair).cloned().unwrap_or_default();

        for idx in indices {
            if is_zero(remaining) {
                break;
            }
            let lot = &mut self.lots[idx];
            let lot_side = if lot.is_short() { Side::Short } else { Side::Long };
            if !lot.is_open() || lot_side != side {
                continue;
            }

            let take = lot.remaining_quantity.abs().min(remaining);
            let signed = take.copysign(lot.quantity);
            let held = lot.remaining_quantity;
            let open_cost = lot.cost_basis - self.consumed_cost[idx];

            lot.remaining_quantity -= signed;
            let cost = if is_zero(lot.remaining_quantity) {
                lot.remaining_quantity = 0.0;
                lot.closed_date = Some(txn.date.clone());
                open_cost
            } else {
                open_cost * signed / held
            };
            self.consumed_cost[idx] += cost;
            remaining -= take;

            if record {
                let allocation = LotAllocation {
                    id: allocation_id(&lot.id, &txn.id),
                    lot_id: lot.id.clone(),
                    transaction_id: txn.id.clone(),
                    shares_allocated: signed,
                    cost_basis_allocated: cost,
                    date: txn.date.clone(),
                };
                self.allocations.push(allocation);
            }
        }

        if is_zero(remaining) {
            0.0
        } else {
            remaining
        }
    }

    fn open_lot(&mut self, txn: &Transaction, pair: &(String, String), quantity: f64, cost_basis: f64) {
        let lot = Lot {
            id: lot_id(&txn.id),
            account_id: pair.0.clone(),
            security_id: pair.1.clone(),
            purchase_date: txn.date.clone(),
            quantity,
            cost_basis,
            remaining_quantity: quantity,
            closed_date: None,
            created_by_transaction_id: txn.id.clone(),
            created_at: txn.date.clone(),
        };
        debug!("{}: opened lot {} for {} shares", txn.id, lot.id, quantity);
        self.by_pair.entry(pair.clone()).or_default().push(self.lots.len());
        self.lots.push(lot);
        self.consumed_cost.push(0.0);
    }

    pub fn finish(self) -> LedgerOutcome {
        let summary = LotImportSummary {
            transactions: self.replayed,
            lots_created: self.lots.len(),
            lots_open: self.lots.iter().filter(|l| l.is_open()).count(),
            allocations: self.allocations.len(),
            skipped: self.skipped,
        };
        LedgerOutcome {
            lots: self.lots,
            allocations: self.allocations,
            summary,
        }
    }
}

/// Rebuild every lot and allocation from the stored transactions.
///
/// Replay happens in memory; the stored ledger is only replaced, in one store
/// transaction, once the whole replay has succeeded.
pub fn import_lots<S: LedgerStore + ?Sized>(store: &mut S) -> CoreResult<LotImportSummary> {
    let accounts = store.accounts()?;
    let securities = store.securities()?;
    let transactions = store.transactions()?;
    let prices = PriceIndex::new(&store.prices()?);

    let outcome = LotLedger::new(&accounts, &securities, &prices).replay(&transactions)?;
    store.replace_lots(&outcome.lots, &outcome.allocations)?;
    log_replay(&outcome.summary);
    Ok(outcome.summary)
}

pub(crate) fn log_replay(summary: &LotImportSummary) {
    info!(
        "Replayed {} investment transactions into {} lots ({} open), {} allocations, {} skipped",
        summary.transactions,
        summary.lots_created,
        summary.lots_open,
        summary.allocations,
        summary.skipped
    );
}

//! Core data models for the lot ledger

use lotbook_parser::InvestmentAction;
use serde::{Deserialize, Serialize};

/// Quantities and amounts at or below this magnitude are treated as zero
pub const EPSILON: f64 = 1e-10;

pub fn is_zero(value: f64) -> bool {
    value.abs() <= EPSILON
}

/// Account row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Content hash of the name
    pub id: String,
    pub name: String,
    /// QIF account type (`Bank`, `Invst`, `CCard`, ...)
    pub account_type: Option<String>,
    pub description: Option<String>,
    pub credit_limit: Option<f64>,
}

/// Security row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub id: String,
    pub name: String,
    pub symbol: Option<String>,
    pub security_type: Option<String>,
    pub goal: Option<String>,
}

/// Fields only investment transactions carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentDetail {
    pub action: InvestmentAction,
    pub security_id: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub commission: Option<f64>,
}

/// Bank or investment specific part of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransactionDetail {
    /// Register transaction; `register` is the QIF context name (`Bank`, `CCard`, ...)
    Bank { register: String },
    Investment(InvestmentDetail),
}

/// Transaction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    /// ISO `YYYY-MM-DD`
    pub date: String,
    pub amount: Option<f64>,
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub number: Option<String>,
    pub cleared: Option<String>,
    pub category: Option<String>,
    /// Running cash balance of the account after this transaction
    pub cash_balance: f64,
    pub detail: TransactionDetail,
}

impl Transaction {
    pub fn investment(&self) -> Option<&InvestmentDetail> {
        match &self.detail {
            TransactionDetail::Investment(detail) => Some(detail),
            TransactionDetail::Bank { .. } => None,
        }
    }
}

/// A block of shares acquired (or sold short) by one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub id: String,
    pub account_id: String,
    pub security_id: String,
    pub purchase_date: String,
    /// Negative for short lots
    pub quantity: f64,
    /// Carries the sign of `quantity`; never changes after creation
    pub cost_basis: f64,
    pub remaining_quantity: f64,
    pub closed_date: Option<String>,
    pub created_by_transaction_id: String,
    pub created_at: String,
}

impl Lot {
    pub fn is_open(&self) -> bool {
        self.closed_date.is_none() && !is_zero(self.remaining_quantity)
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Average cost basis per share over `quantity`
    pub fn cost_per_share(&self) -> f64 {
        if is_zero(self.quantity) {
            0.0
        } else {
            self.cost_basis / self.quantity
        }
    }
}

/// Shares one transaction drew from one lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotAllocation {
    pub id: String,
    pub lot_id: String,
    pub transaction_id: String,
    /// Same sign as the lot quantity
    pub shares_allocated: f64,
    pub cost_basis_allocated: f64,
    pub date: String,
}

/// Historical security price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub id: String,
    pub security_id: String,
    pub date: String,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(quantity: f64, cost_basis: f64, remaining: f64) -> Lot {
        Lot {
            id: "lot".to_string(),
            account_id: "acc".to_string(),
            security_id: "sec".to_string(),
            purchase_date: "2024-01-15".to_string(),
            quantity,
            cost_basis,
            remaining_quantity: remaining,
            closed_date: None,
            created_by_transaction_id: "txn".to_string(),
            created_at: "2024-01-15".to_string(),
        }
    }

    #[test]
    fn test_lot_open_state() {
        assert!(lot(10.0, 1500.0, 4.0).is_open());
        assert!(!lot(10.0, 1500.0, 1e-12).is_open());

        let mut closed = lot(10.0, 1500.0, 4.0);
        closed.closed_date = Some("2024-03-01".to_string());
        assert!(!closed.is_open());
    }

    #[test]
    fn test_cost_per_share_keeps_sign() {
        assert_eq!(lot(10.0, 1500.0, 10.0).cost_per_share(), 150.0);
        let short = lot(-5.0, -850.0, -5.0);
        assert!(short.is_short());
        assert_eq!(short.cost_per_share(), 170.0);
        assert_eq!(lot(0.0, 0.0, 0.0).cost_per_share(), 0.0);
    }

    #[test]
    fn test_transaction_detail_serialization() {
        let detail = TransactionDetail::Bank {
            register: "Bank".to_string(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "bank");
        assert_eq!(json["register"], "Bank");
    }
}

//! Typed QIF entries, one variant per context

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{InvestmentAction, QifContext};

/// Main entry enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entry {
    Account(AccountEntry),
    Category(CategoryEntry),
    Class(ClassEntry),
    Security(SecurityEntry),
    Tag(TagEntry),
    Payee(PayeeEntry),
    Price(PriceEntry),
    BankTransaction(BankTransactionEntry),
    InvestmentTransaction(InvestmentTransactionEntry),
    Other(OtherEntry),
}

impl Entry {
    /// Variant name, used in logs and validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Account(_) => "account",
            Entry::Category(_) => "category",
            Entry::Class(_) => "class",
            Entry::Security(_) => "security",
            Entry::Tag(_) => "tag",
            Entry::Payee(_) => "payee",
            Entry::Price(_) => "price",
            Entry::BankTransaction(_) => "bank transaction",
            Entry::InvestmentTransaction(_) => "investment transaction",
            Entry::Other(_) => "other",
        }
    }
}

/// Account record (`!Account`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountEntry {
    pub name: String,
    pub account_type: Option<String>,
    pub description: Option<String>,
    pub credit_limit: Option<Decimal>,
    pub balance_date: Option<NaiveDate>,
    pub balance: Option<Decimal>,
}

/// Category record (`!Type:Cat`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    pub description: Option<String>,
    pub tax_related: bool,
    pub income: bool,
    pub expense: bool,
    pub budget: Option<Decimal>,
    pub tax_schedule: Option<String>,
}

/// Class record (`!Type:Class`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    pub description: Option<String>,
}

/// Security record (`!Type:Security`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityEntry {
    pub name: String,
    pub symbol: Option<String>,
    pub security_type: Option<String>,
    pub goal: Option<String>,
    pub description: Option<String>,
}

/// Tag record (`!Type:Tag`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagEntry {
    pub name: String,
    pub description: Option<String>,
}

/// Payee record (`!Type:Payee`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PayeeEntry {
    pub name: String,
    pub address: Vec<String>,
    pub category: Option<String>,
    pub memo: Option<String>,
}

/// One `"SYMBOL",price,"date"` line of a `!Type:Prices` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub symbol: String,
    pub price: Decimal,
    pub date: NaiveDate,
}

/// Split line of a bank transaction (`S`/`E`/`$`/`%`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Split {
    pub category: Option<String>,
    pub transfer_account: Option<String>,
    pub memo: Option<String>,
    pub amount: Option<Decimal>,
    pub percent: Option<Decimal>,
}

/// Non-investment register transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransactionEntry {
    /// Context the record appeared in (Bank, Cash, CCard, ...)
    pub transaction_type: QifContext,
    /// Name of the account that was current when the record was read
    pub account: Option<String>,
    pub date: NaiveDate,
    pub amount: Option<Decimal>,
    pub cleared: Option<String>,
    pub number: Option<String>,
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub address: Vec<String>,
    pub category: Option<String>,
    pub class: Option<String>,
    pub transfer_account: Option<String>,
    pub splits: Vec<Split>,
}

/// Investment register transaction (`!Type:Invst`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentTransactionEntry {
    pub account: Option<String>,
    pub date: NaiveDate,
    pub action: InvestmentAction,
    /// Security name from the `Y` line
    pub security: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub cleared: Option<String>,
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub transfer_account: Option<String>,
    pub transfer_amount: Option<Decimal>,
}

/// Record of a recognised context that has no typed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherEntry {
    pub context: QifContext,
    pub lines: Vec<String>,
}

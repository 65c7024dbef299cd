//! Entry classification and referential validation

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entries::{
    AccountEntry, BankTransactionEntry, CategoryEntry, ClassEntry, Entry, InvestmentTransactionEntry,
    OtherEntry, PayeeEntry, PriceEntry, SecurityEntry, TagEntry,
};
use crate::error::ValidationError;

/// Entries partitioned by kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQif {
    /// Sorted by name
    pub accounts: Vec<AccountEntry>,
    pub categories: Vec<CategoryEntry>,
    pub classes: Vec<ClassEntry>,
    pub securities: Vec<SecurityEntry>,
    pub bank_transactions: Vec<BankTransactionEntry>,
    pub investment_transactions: Vec<InvestmentTransactionEntry>,
    pub payees: Vec<PayeeEntry>,
    pub prices: Vec<PriceEntry>,
    pub tags: Vec<TagEntry>,
    pub others: Vec<OtherEntry>,
    /// Final state of `!Option` flags
    pub options: BTreeMap<String, bool>,
}

impl ParsedQif {
    pub fn transaction_count(&self) -> usize {
        self.bank_transactions.len() + self.investment_transactions.len()
    }
}

pub struct EntryClassifier;

impl EntryClassifier {
    /// Partition entries into buckets and validate references between them
    pub fn classify(entries: Vec<Entry>) -> Result<ParsedQif, ValidationError> {
        let mut parsed = ParsedQif::default();

        for entry in entries {
            match entry {
                Entry::Account(account) => Self::push_account(&mut parsed.accounts, account),
                Entry::Category(category) => parsed.categories.push(category),
                Entry::Class(class) => parsed.classes.push(class),
                Entry::Security(security) => parsed.securities.push(security),
                Entry::Tag(tag) => parsed.tags.push(tag),
                Entry::Payee(payee) => parsed.payees.push(payee),
                Entry::Price(price) => parsed.prices.push(price),
                Entry::BankTransaction(txn) => parsed.bank_transactions.push(txn),
                Entry::InvestmentTransaction(txn) => parsed.investment_transactions.push(txn),
                Entry::Other(other) => parsed.others.push(other),
            }
        }

        parsed.accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Self::validate(&parsed)?;

        info!(
            "Classified {} accounts, {} securities, {} bank and {} investment transactions, {} prices",
            parsed.accounts.len(),
            parsed.securities.len(),
            parsed.bank_transactions.len(),
            parsed.investment_transactions.len(),
            parsed.prices.len()
        );
        Ok(parsed)
    }

    /// An account list usually repeats the header of every register in the
    /// file. Repeats that only add detail are folded into the first one;
    /// contradicting repeats are kept for the importer to reject.
    fn push_account(accounts: &mut Vec<AccountEntry>, account: AccountEntry) {
        if let Some(existing) = accounts
            .iter_mut()
            .find(|a| a.name == account.name && compatible(a, &account))
        {
            debug!("Merging repeated account '{}'", account.name);
            merge_into(existing, account);
        } else {
            accounts.push(account);
        }
    }

    fn validate(parsed: &ParsedQif) -> Result<(), ValidationError> {
        if !parsed.investment_transactions.is_empty() && parsed.securities.is_empty() {
            return Err(ValidationError::MissingSecurities);
        }
        if parsed.transaction_count() > 0 && parsed.accounts.is_empty() {
            return Err(ValidationError::MissingAccounts);
        }

        if let Some((index, txn)) = parsed
            .bank_transactions
            .iter()
            .enumerate()
            .find(|(_, t)| t.account.is_none())
        {
            return Err(ValidationError::TransactionMissingAccount {
                kind: "bank transaction".to_string(),
                index: index + 1,
                date: txn.date.to_string(),
            });
        }

        if let Some((index, txn)) = parsed
            .investment_transactions
            .iter()
            .enumerate()
            .find(|(_, t)| t.account.is_none())
        {
            return Err(ValidationError::TransactionMissingAccount {
                kind: "investment transaction".to_string(),
                index: index + 1,
                date: txn.date.to_string(),
            });
        }

        Ok(())
    }
}

fn agrees<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

fn compatible(a: &AccountEntry, b: &AccountEntry) -> bool {
    agrees(&a.account_type, &b.account_type)
        && agrees(&a.description, &b.description)
        && agrees(&a.credit_limit, &b.credit_limit)
}

fn merge_into(existing: &mut AccountEntry, other: AccountEntry) {
    existing.account_type = existing.account_type.take().or(other.account_type);
    existing.description = existing.description.take().or(other.description);
    existing.credit_limit = existing.credit_limit.take().or(other.credit_limit);
    existing.balance_date = existing.balance_date.take().or(other.balance_date);
    existing.balance = existing.balance.take().or(other.balance);
}

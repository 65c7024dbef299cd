//! Error types for lotbook-parser

use std::io;
use thiserror::Error;

/// Malformed or unrecognised QIF input. `group` is the 1-based index of the
/// offending line group.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unknown context '{directive}' at group {group}")]
    UnknownContext { directive: String, group: usize },

    #[error("Record at group {group} appears before any !Type or !Account directive")]
    MissingContext { group: usize },

    #[error("{context} transaction at group {group} has no preceding !Account")]
    TransactionWithoutAccount { context: String, group: usize },

    #[error("Missing '{field}' field in {context} record at group {group}")]
    MissingField {
        field: char,
        context: String,
        group: usize,
    },

    #[error("Invalid date '{value}' at group {group}")]
    InvalidDate { value: String, group: usize },

    #[error("Invalid number '{value}' in '{field}' field at group {group}")]
    InvalidNumber {
        field: char,
        value: String,
        group: usize,
    },

    #[error("Unknown investment action '{action}' at group {group}")]
    UnknownInvestmentAction { action: String, group: usize },

    #[error("Malformed price line '{line}' at group {group}")]
    MalformedPrice { line: String, group: usize },

    #[error("IO error")]
    IoError(#[from] io::Error),
}

/// Referential-integrity failures found after classification
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Investment transactions found but no securities are defined")]
    MissingSecurities,

    #[error("Transactions found but no accounts are defined")]
    MissingAccounts,

    #[error("{kind} #{index} dated {date} has no account")]
    TransactionMissingAccount {
        kind: String,
        index: usize,
        date: String,
    },
}

/// Any failure of the parse pipeline
#[derive(Error, Debug)]
pub enum QifError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

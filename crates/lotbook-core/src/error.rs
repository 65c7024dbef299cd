//! Error types for lotbook-core
//!
//! Every failure of the import pipeline and the lot ledger is a [`CoreError`].
//! Errors carry a stable [`ErrorCode`], a severity and, through
//! [`CoreError::to_details`], suggestions for fixing the input.

use lotbook_parser::{ParseError, QifError, ValidationError};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed QIF input
    ParseError,
    /// Dangling references between QIF entries
    ValidationError,
    /// Same account name with different attributes
    AccountConflict,
    /// Same security name with different attributes
    SecurityConflict,
    /// Referenced account or security does not exist
    NotFound,
    /// Investment action the ledger has no rule for
    UnhandledAction,
    /// Database failure
    StorageError,
    /// Stored data could not be decoded
    InvalidFormat,
    /// IO error
    IoError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ParseError => write!(f, "PARSE_ERROR"),
            ErrorCode::ValidationError => write!(f, "VALIDATION_ERROR"),
            ErrorCode::AccountConflict => write!(f, "ACCOUNT_CONFLICT"),
            ErrorCode::SecurityConflict => write!(f, "SECURITY_CONFLICT"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::UnhandledAction => write!(f, "UNHANDLED_ACTION"),
            ErrorCode::StorageError => write!(f, "STORAGE_ERROR"),
            ErrorCode::InvalidFormat => write!(f, "INVALID_FORMAT"),
            ErrorCode::IoError => write!(f, "IO_ERROR"),
        }
    }
}

/// Detailed error information for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            details: None,
            suggestions: vec![],
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.details = Some(detail);
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, "\nDetails: {}", details)?;
        }
        if !self.suggestions.is_empty() {
            write!(f, "\nSuggestions:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n  - {}", suggestion)?;
            }
        }
        Ok(())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Warning => write!(f, "warning"),
            ErrorSeverity::Error => write!(f, "error"),
            ErrorSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Main error type for lotbook-core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Account '{name}' already exists with a different {field}")]
    AccountConflict { name: String, field: String },

    #[error("Security '{name}' already exists with a different {field}")]
    SecurityConflict { name: String, field: String },

    #[error("{kind} '{id}' referenced by transaction {transaction_id} not found")]
    NotFound {
        kind: String,
        id: String,
        transaction_id: String,
    },

    #[error("No lot rule for investment action '{action}' in transaction {transaction_id}")]
    UnhandledInvestmentAction {
        action: String,
        transaction_id: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<QifError> for CoreError {
    fn from(error: QifError) -> Self {
        match error {
            QifError::Parse(e) => CoreError::Parse(e),
            QifError::Validation(e) => CoreError::Validation(e),
        }
    }
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Parse(ParseError::IoError(_)) => ErrorCode::IoError,
            CoreError::Parse(_) => ErrorCode::ParseError,
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::AccountConflict { .. } => ErrorCode::AccountConflict,
            CoreError::SecurityConflict { .. } => ErrorCode::SecurityConflict,
            CoreError::NotFound { .. } => ErrorCode::NotFound,
            CoreError::UnhandledInvestmentAction { .. } => ErrorCode::UnhandledAction,
            CoreError::Storage(_) => ErrorCode::StorageError,
            CoreError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            CoreError::IoError(_) => ErrorCode::IoError,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::Parse(_) | CoreError::Validation(_) => ErrorSeverity::Error,
            CoreError::AccountConflict { .. } | CoreError::SecurityConflict { .. } => {
                ErrorSeverity::Warning
            }
            CoreError::NotFound { .. } | CoreError::UnhandledInvestmentAction { .. } => {
                ErrorSeverity::Error
            }
            CoreError::Storage(_) | CoreError::InvalidFormat { .. } => ErrorSeverity::Critical,
            CoreError::IoError(_) => ErrorSeverity::Error,
        }
    }

    /// Convert to detailed error info
    pub fn to_details(&self) -> ErrorDetails {
        let mut details = ErrorDetails::new(self.code(), self.to_string());

        match self {
            CoreError::Parse(e) => {
                details = details.with_detail(serde_json::json!({ "parse_message": e.to_string() }));
                details = details.with_suggestion(
                    "Check that every record ends with a '^' line.".to_string(),
                );
                details = details.with_suggestion(
                    "Set import.date_order to day_first if the file uses D/M/Y dates.".to_string(),
                );
            }
            CoreError::Validation(ValidationError::MissingSecurities) => {
                details = details.with_suggestion(
                    "Export the security list (!Type:Security) together with the investment registers."
                        .to_string(),
                );
            }
            CoreError::Validation(_) => {
                details = details.with_suggestion(
                    "Export the account list so every register is preceded by an !Account record."
                        .to_string(),
                );
            }
            CoreError::AccountConflict { name, field } | CoreError::SecurityConflict { name, field } => {
                details = details.with_detail(serde_json::json!({ "name": name, "field": field }));
                details = details.with_suggestion(format!(
                    "Rename '{}' in the file or remove the existing database.",
                    name
                ));
            }
            CoreError::NotFound { kind, id, .. } => {
                details = details.with_detail(serde_json::json!({ "kind": kind, "id": id }));
                details = details.with_suggestion(
                    "Import the file that declares this record before replaying lots.".to_string(),
                );
            }
            CoreError::UnhandledInvestmentAction { action, .. } => {
                details = details.with_suggestion(format!(
                    "Transactions with action '{}' must be edited before import.",
                    action
                ));
            }
            _ => {}
        }

        details
    }
}

/// Result type with CoreError
pub type CoreResult<T> = Result<T, CoreError>;

// ==================== Tests ====================

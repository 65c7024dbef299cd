//! QIF parser implementation
//!
//! Reads Quicken Interchange Format text in three stages: lines are grouped
//! into records, records become typed entries under the active context, and
//! entries are classified into buckets and checked for dangling references.

use async_trait::async_trait;
use lotbook_config::DateOrder;
use std::path::PathBuf;
use std::sync::Arc;

pub mod classify;
pub mod entries;
pub mod error;
pub mod grouper;
pub mod parser;
pub mod types;

pub use classify::{EntryClassifier, ParsedQif};
pub use error::{ParseError, QifError, ValidationError};
pub use grouper::LineGrouper;
pub use parser::{parse_qif_date, ContextualEntryBuilder, ParserState, QifParser};

// Re-export commonly used types
pub use entries::{
    AccountEntry, BankTransactionEntry, CategoryEntry, ClassEntry, Entry, InvestmentTransactionEntry,
    OtherEntry, PayeeEntry, PriceEntry, SecurityEntry, Split, TagEntry,
};
pub use types::{InvestmentAction, LineGroup, QifContext};

/// Parse a QIF document using month-first dates
pub fn parse(content: &str) -> Result<ParsedQif, QifError> {
    QifParser::default().parse(content)
}

// ==================== Parser Trait ====================

/// Parser reference type
pub type ParserRef = Arc<dyn QifParserTrait>;

/// Trait for QIF parsers
#[async_trait]
pub trait QifParserTrait: Send + Sync {
    /// Parse QIF text
    async fn parse(&self, content: &str) -> Result<ParsedQif, QifError>;

    /// Read and parse a QIF file
    async fn parse_file(&self, path: PathBuf) -> Result<ParsedQif, QifError>;
}

/// Default parser implementation
#[derive(Debug, Default)]
pub struct DefaultQifParser {
    date_order: DateOrder,
}

impl DefaultQifParser {
    pub fn new(date_order: DateOrder) -> Self {
        Self { date_order }
    }
}

#[async_trait]
impl QifParserTrait for DefaultQifParser {
    async fn parse(&self, content: &str) -> Result<ParsedQif, QifError> {
        QifParser::new(self.date_order).parse(content)
    }

    async fn parse_file(&self, path: PathBuf) -> Result<ParsedQif, QifError> {
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(ParseError::IoError)?;
        log::info!("Parsing QIF file {}", path.display());
        QifParser::new(self.date_order).parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"!Option:AutoSwitch
!Account
NBrokerage
TInvst
^
NChecking
TBank
^
!Clear:AutoSwitch
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
NBuy
YAPL
I150.25
Q10
T1,502.50
^
D3/1'24
NSell
YAPL
I170.00
Q4
T680.00
^
!Account
NChecking
TBank
^
!Type:Bank
D1/2'24
T2,000.00
PEmployer
LSalary
^
!Type:Prices
"APL",150.25," 1/15'24"
"APL",170," 3/1'24"
^
"#;

    #[test]
    fn test_parse_end_to_end() {
        let parsed = parse(SAMPLE).unwrap();
        let names: Vec<&str> = parsed.accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Brokerage", "Checking"]);
        assert_eq!(parsed.securities.len(), 1);
        assert_eq!(parsed.investment_transactions.len(), 2);
        assert_eq!(parsed.bank_transactions.len(), 1);
        assert_eq!(parsed.prices.len(), 2);
        assert_eq!(parsed.options.get("AutoSwitch"), Some(&false));
        assert!(parsed
            .investment_transactions
            .iter()
            .all(|t| t.account.as_deref() == Some("Brokerage")));
        assert_eq!(parsed.bank_transactions[0].account.as_deref(), Some("Checking"));
    }

    #[test]
    fn test_parse_reports_missing_securities() {
        let input = "!Account\nNBrokerage\nTInvst\n^\n!Type:Invst\nD1/15'24\nNBuy\nYAPL\nQ1\n^\n";
        let err = parse(input).unwrap_err();
        assert!(matches!(err, QifError::Validation(ValidationError::MissingSecurities)));
    }

    #[test]
    fn test_parse_reports_parse_errors() {
        let err = parse("!Type:Nonsense\n").unwrap_err();
        assert!(matches!(err, QifError::Parse(ParseError::UnknownContext { .. })));
    }
}

//! Common types for the QIF parser

use serde::{Deserialize, Serialize};

/// One QIF record as produced by the line grouper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineGroup {
    /// A standalone `!Type:`, `!Option:` or `!Clear:` line
    Directive(String),
    /// Field lines of a `^`-terminated record, terminator excluded
    Record(Vec<String>),
}

impl LineGroup {
    /// Short description used in error messages
    pub fn describe(&self) -> String {
        match self {
            LineGroup::Directive(line) => line.clone(),
            LineGroup::Record(lines) => match lines.first() {
                Some(first) => format!("record starting with '{}'", first),
                None => "empty record".to_string(),
            },
        }
    }
}

/// Parsing context selected by `!Type:` directives or an `!Account` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QifContext {
    Account,
    Bank,
    Cash,
    CreditCard,
    Investment,
    Invoice,
    OtherAsset,
    OtherLiability,
    Category,
    Class,
    Security,
    Prices,
    Tag,
    Payee,
    Memorized,
}

impl QifContext {
    /// Look up the name following `!Type:`
    pub fn from_directive(name: &str) -> Option<Self> {
        let context = match name.trim().to_lowercase().as_str() {
            "bank" => QifContext::Bank,
            "cash" => QifContext::Cash,
            "ccard" => QifContext::CreditCard,
            "invst" => QifContext::Investment,
            "invoice" => QifContext::Invoice,
            "oth a" => QifContext::OtherAsset,
            "oth l" => QifContext::OtherLiability,
            "cat" => QifContext::Category,
            "class" => QifContext::Class,
            "security" => QifContext::Security,
            "prices" => QifContext::Prices,
            "tag" => QifContext::Tag,
            "payee" => QifContext::Payee,
            "memorized" => QifContext::Memorized,
            _ => return None,
        };
        Some(context)
    }

    /// Contexts whose records are transactions and need a current account
    pub fn is_transaction_context(&self) -> bool {
        matches!(
            self,
            QifContext::Bank
                | QifContext::Cash
                | QifContext::CreditCard
                | QifContext::Investment
                | QifContext::Invoice
                | QifContext::OtherAsset
                | QifContext::OtherLiability
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QifContext::Account => "Account",
            QifContext::Bank => "Bank",
            QifContext::Cash => "Cash",
            QifContext::CreditCard => "CCard",
            QifContext::Investment => "Invst",
            QifContext::Invoice => "Invoice",
            QifContext::OtherAsset => "Oth A",
            QifContext::OtherLiability => "Oth L",
            QifContext::Category => "Cat",
            QifContext::Class => "Class",
            QifContext::Security => "Security",
            QifContext::Prices => "Prices",
            QifContext::Tag => "Tag",
            QifContext::Payee => "Payee",
            QifContext::Memorized => "Memorized",
        }
    }
}

impl std::fmt::Display for QifContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Investment action codes from the `N` line of an `!Type:Invst` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvestmentAction {
    Buy,
    BuyX,
    Sell,
    SellX,
    ShtSell,
    CvrShrt,
    ShrsIn,
    ShrsOut,
    ReinvDiv,
    ReinvInt,
    ReinvLg,
    ReinvSh,
    ReinvMd,
    StkSplit,
    StkDiv,
    Grant,
    Vest,
    Exercise,
    Expire,
    Div,
    DivX,
    IntInc,
    IntIncX,
    MiscInc,
    MiscIncX,
    MiscExp,
    MiscExpX,
    MargInt,
    MargIntX,
    Cash,
    CGShort,
    CGShortX,
    CGMid,
    CGMidX,
    CGLong,
    CGLongX,
    ContribX,
    WithdrwX,
    RtrnCap,
    RtrnCapX,
    Reminder,
    XIn,
    XOut,
}

impl InvestmentAction {
    pub const ALL: [InvestmentAction; 43] = [
        InvestmentAction::Buy,
        InvestmentAction::BuyX,
        InvestmentAction::Sell,
        InvestmentAction::SellX,
        InvestmentAction::ShtSell,
        InvestmentAction::CvrShrt,
        InvestmentAction::ShrsIn,
        InvestmentAction::ShrsOut,
        InvestmentAction::ReinvDiv,
        InvestmentAction::ReinvInt,
        InvestmentAction::ReinvLg,
        InvestmentAction::ReinvSh,
        InvestmentAction::ReinvMd,
        InvestmentAction::StkSplit,
        InvestmentAction::StkDiv,
        InvestmentAction::Grant,
        InvestmentAction::Vest,
        InvestmentAction::Exercise,
        InvestmentAction::Expire,
        InvestmentAction::Div,
        InvestmentAction::DivX,
        InvestmentAction::IntInc,
        InvestmentAction::IntIncX,
        InvestmentAction::MiscInc,
        InvestmentAction::MiscIncX,
        InvestmentAction::MiscExp,
        InvestmentAction::MiscExpX,
        InvestmentAction::MargInt,
        InvestmentAction::MargIntX,
        InvestmentAction::Cash,
        InvestmentAction::CGShort,
        InvestmentAction::CGShortX,
        InvestmentAction::CGMid,
        InvestmentAction::CGMidX,
        InvestmentAction::CGLong,
        InvestmentAction::CGLongX,
        InvestmentAction::ContribX,
        InvestmentAction::WithdrwX,
        InvestmentAction::RtrnCap,
        InvestmentAction::RtrnCapX,
        InvestmentAction::Reminder,
        InvestmentAction::XIn,
        InvestmentAction::XOut,
    ];

    /// The QIF spelling of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentAction::Buy => "Buy",
            InvestmentAction::BuyX => "BuyX",
            InvestmentAction::Sell => "Sell",
            InvestmentAction::SellX => "SellX",
            InvestmentAction::ShtSell => "ShtSell",
            InvestmentAction::CvrShrt => "CvrShrt",
            InvestmentAction::ShrsIn => "ShrsIn",
            InvestmentAction::ShrsOut => "ShrsOut",
            InvestmentAction::ReinvDiv => "ReinvDiv",
            InvestmentAction::ReinvInt => "ReinvInt",
            InvestmentAction::ReinvLg => "ReinvLg",
            InvestmentAction::ReinvSh => "ReinvSh",
            InvestmentAction::ReinvMd => "ReinvMd",
            InvestmentAction::StkSplit => "StkSplit",
            InvestmentAction::StkDiv => "StkDiv",
            InvestmentAction::Grant => "Grant",
            InvestmentAction::Vest => "Vest",
            InvestmentAction::Exercise => "Exercise",
            InvestmentAction::Expire => "Expire",
            InvestmentAction::Div => "Div",
            InvestmentAction::DivX => "DivX",
            InvestmentAction::IntInc => "IntInc",
            InvestmentAction::IntIncX => "IntIncX",
            InvestmentAction::MiscInc => "MiscInc",
            InvestmentAction::MiscIncX => "MiscIncX",
            InvestmentAction::MiscExp => "MiscExp",
            InvestmentAction::MiscExpX => "MiscExpX",
            InvestmentAction::MargInt => "MargInt",
            InvestmentAction::MargIntX => "MargIntX",
            InvestmentAction::Cash => "Cash",
            InvestmentAction::CGShort => "CGShort",
            InvestmentAction::CGShortX => "CGShortX",
            InvestmentAction::CGMid => "CGMid",
            InvestmentAction::CGMidX => "CGMidX",
            InvestmentAction::CGLong => "CGLong",
            InvestmentAction::CGLongX => "CGLongX",
            InvestmentAction::ContribX => "ContribX",
            InvestmentAction::WithdrwX => "WithdrwX",
            InvestmentAction::RtrnCap => "RtrnCap",
            InvestmentAction::RtrnCapX => "RtrnCapX",
            InvestmentAction::Reminder => "Reminder",
            InvestmentAction::XIn => "XIn",
            InvestmentAction::XOut => "XOut",
        }
    }
}

impl std::str::FromStr for InvestmentAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        InvestmentAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Invalid investment action: {}", s))
    }
}

impl std::fmt::Display for InvestmentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_group_describe() {
        assert_eq!(LineGroup::Directive("!Type:Bank".to_string()).describe(), "!Type:Bank");
        assert_eq!(
            LineGroup::Record(vec!["D1/2'24".to_string(), "T10".to_string()]).describe(),
            "record starting with 'D1/2'24'"
        );
        assert_eq!(LineGroup::Record(vec![]).describe(), "empty record");
    }
}

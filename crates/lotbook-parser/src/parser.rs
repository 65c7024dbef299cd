//! QIF entry builder
//!
//! Turns line groups into typed entries. The builder keeps no hidden state:
//! the current context, the current account and the `!Option` flags live in
//! a [`ParserState`] that is folded over the groups and handed back with the
//! entries.

use chrono::NaiveDate;
use log::debug;
use lotbook_config::DateOrder;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::classify::{EntryClassifier, ParsedQif};
use crate::entries::{
    AccountEntry, BankTransactionEntry, CategoryEntry, ClassEntry, Entry, InvestmentTransactionEntry,
    OtherEntry, PayeeEntry, PriceEntry, SecurityEntry, Split, TagEntry,
};
use crate::error::{ParseError, QifError};
use crate::grouper::LineGrouper;
use crate::types::{InvestmentAction, LineGroup, QifContext};

/// Parser state threaded through every line group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserState {
    /// Context selected by the last `!Type:` directive or `!Account` record
    pub context: Option<QifContext>,
    /// Most recently built account
    pub current_account: Option<AccountEntry>,
    /// Flags toggled by `!Option:` and `!Clear:`
    pub options: BTreeMap<String, bool>,
    pub date_order: DateOrder,
}

impl ParserState {
    pub fn new(date_order: DateOrder) -> Self {
        Self {
            date_order,
            ..Default::default()
        }
    }

    /// Whether an `!Option:` flag is currently set
    pub fn option(&self, name: &str) -> bool {
        self.options.get(name).copied().unwrap_or(false)
    }
}

/// Whole-document QIF parser
#[derive(Debug, Clone, Copy, Default)]
pub struct QifParser {
    date_order: DateOrder,
}

impl QifParser {
    pub fn new(date_order: DateOrder) -> Self {
        Self { date_order }
    }

    /// Group, build and classify a QIF document
    pub fn parse(&self, content: &str) -> Result<ParsedQif, QifError> {
        let (state, entries) = self.parse_entries(content)?;
        let mut parsed = EntryClassifier::classify(entries)?;
        parsed.options = state.options;
        Ok(parsed)
    }

    /// Group and build without classification
    pub fn parse_entries(&self, content: &str) -> Result<(ParserState, Vec<Entry>), ParseError> {
        let groups = LineGrouper::group(content);
        debug!("Grouped QIF input into {} line groups", groups.len());
        ContextualEntryBuilder::build(&groups, ParserState::new(self.date_order))
    }
}

/// Builds entries from line groups according to the active context
pub struct ContextualEntryBuilder;

impl ContextualEntryBuilder {
    /// Fold every group through [`ContextualEntryBuilder::step`]
    pub fn build(
        groups: &[LineGroup],
        state: ParserState,
    ) -> Result<(ParserState, Vec<Entry>), ParseError> {
        groups
            .iter()
            .enumerate()
            .try_fold((state, Vec::new()), |(state, mut entries), (i, group)| {
                let (state, produced) = Self::step(state, group, i + 1)?;
                entries.extend(produced);
                Ok((state, entries))
            })
    }

    /// Process one group. A record may yield zero, one or several entries.
    pub fn step(
        mut state: ParserState,
        group: &LineGroup,
        index: usize,
    ) -> Result<(ParserState, Vec<Entry>), ParseError> {
        debug!("Group {}: {}", index, group.describe());
        let entries = match group {
            LineGroup::Directive(line) => {
                Self::apply_directive(&mut state, line, index)?;
                Vec::new()
            }
            LineGroup::Record(lines) => Self::build_record(&mut state, lines, index)?,
        };
        Ok((state, entries))
    }

    fn apply_directive(state: &mut ParserState, line: &str, group: usize) -> Result<(), ParseError> {
        if let Some(name) = directive_argument(line, "!Option") {
            debug!("Option '{}' set", name);
            state.options.insert(name, true);
        } else if let Some(name) = directive_argument(line, "!Clear") {
            debug!("Option '{}' cleared", name);
            state.options.insert(name, false);
        } else if let Some(name) = directive_argument(line, "!Type") {
            let context = QifContext::from_directive(&name).ok_or_else(|| ParseError::UnknownContext {
                directive: name.clone(),
                group,
            })?;
            debug!("Switching to context {} at group {}", context, group);
            state.context = Some(context);
        } else {
            return Err(ParseError::UnknownContext {
                directive: line.to_string(),
                group,
            });
        }
        Ok(())
    }

    fn build_record(
        state: &mut ParserState,
        lines: &[String],
        group: usize,
    ) -> Result<Vec<Entry>, ParseError> {
        let first = match lines.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        };

        if first.eq_ignore_ascii_case("!Account") {
            state.context = Some(QifContext::Account);
            let rest = &lines[1..];
            if rest.is_empty() {
                return Ok(Vec::new());
            }
            let account = Self::build_account(rest, state.date_order, group)?;
            state.current_account = Some(account.clone());
            return Ok(vec![Entry::Account(account)]);
        }

        if first.starts_with('!') {
            return Err(ParseError::UnknownContext {
                directive: first.clone(),
                group,
            });
        }

        let context = state.context.ok_or(ParseError::MissingContext { group })?;
        if context.is_transaction_context() && state.current_account.is_none() {
            return Err(ParseError::TransactionWithoutAccount {
                context: context.to_string(),
                group,
            });
        }

        let entries = match context {
            QifContext::Account => {
                let account = Self::build_account(lines, state.date_order, group)?;
                state.current_account = Some(account.clone());
                vec![Entry::Account(account)]
            }
            QifContext::Bank
            | QifContext::Cash
            | QifContext::CreditCard
            | QifContext::Invoice
            | QifContext::OtherAsset
            | QifContext::OtherLiability => {
                vec![Entry::BankTransaction(Self::build_bank_transaction(
                    context, lines, state, group,
                )?)]
            }
            QifContext::Investment => {
                vec![Entry::InvestmentTransaction(Self::build_investment_transaction(
                    lines, state, group,
                )?)]
            }
            QifContext::Category => vec![Entry::Category(Self::build_category(lines, group)?)],
            QifContext::Class => vec![Entry::Class(Self::build_class(lines, group)?)],
            QifContext::Security => vec![Entry::Security(Self::build_security(lines, group)?)],
            QifContext::Tag => vec![Entry::Tag(Self::build_tag(lines, group)?)],
            QifContext::Payee => vec![Entry::Payee(Self::build_payee(lines, group)?)],
            QifContext::Prices => lines
                .iter()
                .map(|line| parse_price_line(line, state.date_order, group).map(Entry::Price))
                .collect::<Result<Vec<_>, _>>()?,
            QifContext::Memorized => vec![Entry::Other(OtherEntry {
                context,
                lines: lines.to_vec(),
            })],
        };

        Ok(entries)
    }

    fn build_account(
        lines: &[String],
        date_order: DateOrder,
        group: usize,
    ) -> Result<AccountEntry, ParseError> {
        let mut account = AccountEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => account.name = value.to_string(),
                'T' => account.account_type = non_empty(value),
                'D' => account.description = non_empty(value),
                'L' => account.credit_limit = parse_number(value, prefix, group)?,
                '/' if !value.is_empty() => {
                    account.balance_date = Some(parse_date_field(value, date_order, group)?)
                }
                '$' => account.balance = parse_number(value, prefix, group)?,
                _ => debug!("Ignoring account field '{}' at group {}", prefix, group),
            }
        }
        require_name(&account.name, "Account", group)?;
        Ok(account)
    }

    fn build_bank_transaction(
        context: QifContext,
        lines: &[String],
        state: &ParserState,
        group: usize,
    ) -> Result<BankTransactionEntry, ParseError> {
        let mut date = None;
        let mut total = None;
        let mut u_total = None;
        let mut txn = BankTransactionEntry {
            transaction_type: context,
            account: state.current_account.as_ref().map(|a| a.name.clone()),
            date: NaiveDate::MIN,
            amount: None,
            cleared: None,
            number: None,
            payee: None,
            memo: None,
            address: Vec::new(),
            category: None,
            class: None,
            transfer_account: None,
            splits: Vec::new(),
        };

        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'D' => date = Some(parse_date_field(value, state.date_order, group)?),
                'T' => total = parse_number(value, prefix, group)?,
                'U' => u_total = parse_number(value, prefix, group)?,
                'C' => txn.cleared = non_empty(value),
                'N' => txn.number = non_empty(value),
                'P' => txn.payee = non_empty(value),
                'M' => txn.memo = non_empty(value),
                'A' => txn.address.push(value.to_string()),
                'L' => {
                    let (category, transfer, class) = parse_category(value);
                    txn.category = category;
                    txn.transfer_account = transfer;
                    txn.class = class;
                }
                'S' => {
                    let (category, transfer, _) = parse_category(value);
                    txn.splits.push(Split {
                        category,
                        transfer_account: transfer,
                        ..Default::default()
                    });
                }
                'E' => last_split(&mut txn.splits).memo = non_empty(value),
                '$' => last_split(&mut txn.splits).amount = parse_number(value, prefix, group)?,
                '%' => {
                    last_split(&mut txn.splits).percent =
                        parse_number(value.trim_end_matches('%'), prefix, group)?
                }
                _ => debug!("Ignoring {} field '{}' at group {}", context, prefix, group),
            }
        }

        txn.date = date.ok_or_else(|| ParseError::MissingField {
            field: 'D',
            context: context.to_string(),
            group,
        })?;
        txn.amount = total.or(u_total);
        Ok(txn)
    }

    fn build_investment_transaction(
        lines: &[String],
        state: &ParserState,
        group: usize,
    ) -> Result<InvestmentTransactionEntry, ParseError> {
        let mut date = None;
        let mut action = None;
        let mut total = None;
        let mut u_total = None;
        let mut security = None;
        let mut price = None;
        let mut quantity = None;
        let mut commission = None;
        let mut cleared = None;
        let mut payee = None;
        let mut memo = None;
        let mut transfer_account = None;
        let mut transfer_amount = None;

        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'D' => date = Some(parse_date_field(value, state.date_order, group)?),
                'N' => {
                    let parsed = InvestmentAction::from_str(value).map_err(|_| {
                        ParseError::UnknownInvestmentAction {
                            action: value.to_string(),
                            group,
                        }
                    })?;
                    action = Some(parsed);
                }
                'Y' => security = non_empty(value),
                'I' => price = parse_number(value, prefix, group)?,
                'Q' => quantity = parse_number(value, prefix, group)?,
                'T' => total = parse_number(value, prefix, group)?,
                'U' => u_total = parse_number(value, prefix, group)?,
                'O' => commission = parse_number(value, prefix, group)?,
                'C' => cleared = non_empty(value),
                'P' => payee = non_empty(value),
                'M' => memo = non_empty(value),
                'L' => transfer_account = non_empty(strip_brackets(value)),
                '$' => transfer_amount = parse_number(value, prefix, group)?,
                _ => debug!("Ignoring Invst field '{}' at group {}", prefix, group),
            }
        }

        let missing = |field: char| ParseError::MissingField {
            field,
            context: QifContext::Investment.to_string(),
            group,
        };

        Ok(InvestmentTransactionEntry {
            account: state.current_account.as_ref().map(|a| a.name.clone()),
            date: date.ok_or_else(|| missing('D'))?,
            action: action.ok_or_else(|| missing('N'))?,
            security,
            price,
            quantity,
            amount: total.or(u_total),
            commission,
            cleared,
            payee,
            memo,
            transfer_account,
            transfer_amount,
        })
    }

    fn build_category(lines: &[String], group: usize) -> Result<CategoryEntry, ParseError> {
        let mut category = CategoryEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => category.name = value.to_string(),
                'D' => category.description = non_empty(value),
                'T' => category.tax_related = true,
                'I' => category.income = true,
                'E' => category.expense = true,
                'B' => category.budget = parse_number(value, prefix, group)?,
                'R' => category.tax_schedule = non_empty(value),
                _ => debug!("Ignoring category field '{}' at group {}", prefix, group),
            }
        }
        require_name(&category.name, "Cat", group)?;
        Ok(category)
    }

    fn build_class(lines: &[String], group: usize) -> Result<ClassEntry, ParseError> {
        let mut class = ClassEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => class.name = value.to_string(),
                'D' => class.description = non_empty(value),
                _ => debug!("Ignoring class field '{}' at group {}", prefix, group),
            }
        }
        require_name(&class.name, "Class", group)?;
        Ok(class)
    }

    fn build_security(lines: &[String], group: usize) -> Result<SecurityEntry, ParseError> {
        let mut security = SecurityEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => security.name = value.to_string(),
                'S' => security.symbol = non_empty(value),
                'T' => security.security_type = non_empty(value),
                'G' => security.goal = non_empty(value),
                'D' => security.description = non_empty(value),
                _ => debug!("Ignoring security field '{}' at group {}", prefix, group),
            }
        }
        require_name(&security.name, "Security", group)?;
        Ok(security)
    }

    fn build_tag(lines: &[String], group: usize) -> Result<TagEntry, ParseError> {
        let mut tag = TagEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => tag.name = value.to_string(),
                'D' => tag.description = non_empty(value),
                _ => debug!("Ignoring tag field '{}' at group {}", prefix, group),
            }
        }
        require_name(&tag.name, "Tag", group)?;
        Ok(tag)
    }

    fn build_payee(lines: &[String], group: usize) -> Result<PayeeEntry, ParseError> {
        let mut payee = PayeeEntry::default();
        for (prefix, value) in lines.iter().filter_map(|l| split_field(l)) {
            match prefix {
                'N' => payee.name = value.to_string(),
                'A' => payee.address.push(value.to_string()),
                'L' => payee.category = non_empty(value),
                'M' => payee.memo = non_empty(value),
                _ => debug!("Ignoring payee field '{}' at group {}", prefix, group),
            }
        }
        require_name(&payee.name, "Payee", group)?;
        Ok(payee)
    }
}

// ==================== Field Helpers ====================

fn directive_argument(line: &str, prefix: &str) -> Option<String> {
    line.strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches(':').trim().to_string())
}

/// Split a field line into its one-character prefix and value
fn split_field(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let prefix = chars.next()?;
    Some((prefix, chars.as_str().trim()))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn require_name(name: &str, context: &str, group: usize) -> Result<(), ParseError> {
    if name.is_empty() {
        Err(ParseError::MissingField {
            field: 'N',
            context: context.to_string(),
            group,
        })
    } else {
        Ok(())
    }
}

fn strip_brackets(value: &str) -> &str {
    value.trim_start_matches('[').trim_end_matches(']')
}

fn last_split(splits: &mut Vec<Split>) -> &mut Split {
    if splits.is_empty() {
        splits.push(Split::default());
    }
    let last = splits.len() - 1;
    &mut splits[last]
}

/// Split an `L`/`S` value into (category, transfer account, class).
///
/// `[Savings]/Work` is a transfer to `Savings` tagged with class `Work`.
fn parse_category(value: &str) -> (Option<String>, Option<String>, Option<String>) {
    let (target, class) = match value.split_once('/') {
        Some((target, class)) => (target.trim(), non_empty(class.trim())),
        None => (value.trim(), None),
    };

    if target.starts_with('[') && target.ends_with(']') {
        (None, non_empty(strip_brackets(target)), class)
    } else {
        (non_empty(target), None, class)
    }
}

/// Parse an amount, ignoring thousands separators and currency signs
fn parse_number(value: &str, field: char, group: usize) -> Result<Option<Decimal>, ParseError> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '$')
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&cleaned)
        .map(Some)
        .map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
            group,
        })
}

fn parse_date_field(value: &str, order: DateOrder, group: usize) -> Result<NaiveDate, ParseError> {
    parse_qif_date(value, order).ok_or_else(|| ParseError::InvalidDate {
        value: value.to_string(),
        group,
    })
}

/// Parse a QIF date.
///
/// Accepts `M/D'YY` (20YY), `M/D/YY` (19YY), `M/D/YYYY`, `M-D-YYYY`, `M.D.YYYY`
/// and ISO `YYYY-MM-DD`; embedded spaces such as ` 1/ 5'24` are ignored.
pub fn parse_qif_date(value: &str, order: DateOrder) -> Option<NaiveDate> {
    static ISO_DATE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    static QIF_DATE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let iso_regex = ISO_DATE.get_or_init(|| {
        regex::Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap()
    });
    let qif_regex = QIF_DATE.get_or_init(|| {
        regex::Regex::new(r"^(\d{1,2})[/\-.](\d{1,2})(['/\-.])(\d{1,4})$").unwrap()
    });

    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(caps) = iso_regex.captures(&compact) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let caps = qif_regex.captures(&compact)?;
    let first: u32 = caps[1].parse().ok()?;
    let second: u32 = caps[2].parse().ok()?;
    let year_digits = &caps[4];
    let short_year: i32 = year_digits.parse().ok()?;
    let year = match year_digits.len() {
        4 => short_year,
        1 | 2 if &caps[3] == "'" => 2000 + short_year,
        1 | 2 => 1900 + short_year,
        _ => return None,
    };

    let (month, day) = match order {
        DateOrder::MonthFirst => (first, second),
        DateOrder::DayFirst => (second, first),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a price that may be written as a fraction, e.g. `12 1/2`
fn parse_price_value(value: &str) -> Option<Decimal> {
    let value = value.trim().replace(',', "");
    if value.is_empty() {
        return None;
    }

    let fraction = |text: &str| -> Option<Decimal> {
        let (num, den) = text.split_once('/')?;
        let num = Decimal::from_str(num.trim()).ok()?;
        let den = Decimal::from_str(den.trim()).ok()?;
        if den.is_zero() {
            None
        } else {
            Some(num / den)
        }
    };

    match value.split_once(' ') {
        Some((whole, frac)) if frac.contains('/') => {
            Some(Decimal::from_str(whole.trim()).ok()? + fraction(frac)?)
        }
        _ if value.contains('/') => fraction(&value),
        _ => Decimal::from_str(&value).ok(),
    }
}

/// Parse a `"SYMBOL",price,"date"` line
fn parse_price_line(line: &str, order: DateOrder, group: usize) -> Result<PriceEntry, ParseError> {
    static PRICE_LINE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let price_regex = PRICE_LINE.get_or_init(|| {
        regex::Regex::new(r#"^"?([^",]*)"?\s*,\s*"?([^",]*)"?\s*,\s*"?([^"]*)"?\s*$"#).unwrap()
    });

    let malformed = || ParseError::MalformedPrice {
        line: line.to_string(),
        group,
    };

    let caps = price_regex.captures(line).ok_or_else(malformed)?;
    let symbol = caps[1].trim().to_string();
    if symbol.is_empty() {
        return Err(malformed());
    }
    let price = parse_price_value(&caps[2]).ok_or_else(malformed)?;
    let date = parse_date_field(&caps[3], order, group)?;

    Ok(PriceEntry { symbol, price, date })
}

// ==================== Tests ====================

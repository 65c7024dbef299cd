//! ISO date helpers
//!
//! Stored dates are `YYYY-MM-DD` strings, so lexical order is chronological
//! order and most comparisons work on the strings directly.

use chrono::{NaiveDate, Utc};

use crate::error::{CoreError, CoreResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| CoreError::InvalidFormat {
        message: format!("'{}' is not a YYYY-MM-DD date", value),
    })
}

/// Today's date in UTC
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// The calendar day before `date`
pub fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

/// Whole days from `earlier` to `later`, `None` if either is not an ISO date
pub fn days_between(earlier: &str, later: &str) -> Option<i64> {
    let earlier = NaiveDate::parse_from_str(earlier, DATE_FORMAT).ok()?;
    let later = NaiveDate::parse_from_str(later, DATE_FORMAT).ok()?;
    Some((later - earlier).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(format_date(date), "2024-03-01");
        assert_eq!(parse_date("2024-03-01").unwrap(), date);
        assert!(parse_date("03/01/2024").is_err());
    }

    #[test]
    fn test_day_before() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(format_date(day_before(date)), "2024-02-29");
    }

    #[test]
    fn test_days_between() {
        assert_eq!(days_between("2024-01-15", "2024-01-17"), Some(2));
        assert_eq!(days_between("2024-01-17", "2024-01-15"), Some(-2));
        assert_eq!(days_between("bad", "2024-01-15"), None);
    }
}

//! Content hashing and small shared helpers

use sha2::{Digest, Sha256};

/// Length of the hex ids handed out by [`content_hash`]
pub const ID_LENGTH: usize = 32;

/// Derive a stable id from a list of fields.
///
/// Fields are joined with a `|` separator before hashing, so `["ab", "c"]`
/// and `["a", "bc"]` produce different ids. The same fields always produce
/// the same id, which is what keeps re-imports idempotent.
pub fn content_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LENGTH);
    id
}

/// Normalize a float for hashing so `10`, `10.0` and `10.000` agree
pub fn normalize_number(value: f64) -> String {
    let s = format!("{:.10}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Format a number with thousands separators and two decimals
pub fn format_money(value: f64) -> String {
    let negative = value < 0.0;
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (count, c) in int_part.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let int_grouped: String = grouped.chars().rev().collect();

    if negative {
        format!("-{}.{}", int_grouped, frac_part)
    } else {
        format!("{}.{}", int_grouped, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(&["account", "Brokerage"]);
        let b = content_hash(&["account", "Brokerage"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), ID_LENGTH);
    }

    #[test]
    fn test_content_hash_separates_fields() {
        assert_ne!(content_hash(&["ab", "c"]), content_hash(&["a", "bc"]));
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number(10.0), "10");
        assert_eq!(normalize_number(150.25), "150.25");
        assert_eq!(normalize_number(-0.0), "0");
        assert_eq!(normalize_number(-2.5), "-2.5");
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(1502.5), "1,502.50");
        assert_eq!(format_money(-1234567.891), "-1,234,567.89");
        assert_eq!(format_money(0.0), "0.00");
    }
}

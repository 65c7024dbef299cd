//! Historical price lookup shared by the lot ledger and holdings valuation

use std::collections::HashMap;

use crate::models::Price;

/// Prices grouped by security and sorted by date
#[derive(Debug, Default)]
pub struct PriceIndex {
    by_security: HashMap<String, Vec<(String, f64)>>,
}

impl PriceIndex {
    pub fn new(prices: &[Price]) -> Self {
        let mut by_security: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        for price in prices {
            by_security
                .entry(price.security_id.clone())
                .or_default()
                .push((price.date.clone(), price.price));
        }
        for series in by_security.values_mut() {
            series.sort_by(|a, b| a.0.cmp(&b.0));
            series.dedup_by(|later, earlier| later.0 == earlier.0);
        }
        Self { by_security }
    }

    /// Latest `(date, price)` on or before `date`
    pub fn latest_at_or_before(&self, security_id: &str, date: &str) -> Option<(&str, f64)> {
        let series = self.by_security.get(security_id)?;
        let idx = series.partition_point(|(d, _)| d.as_str() <= date);
        if idx == 0 {
            None
        } else {
            let (d, p) = &series[idx - 1];
            Some((d.as_str(), *p))
        }
    }

    pub fn len(&self) -> usize {
        self.by_security.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(security: &str, date: &str, value: f64) -> Price {
        Price {
            id: format!("{}-{}", security, date),
            security_id: security.to_string(),
            date: date.to_string(),
            price: value,
        }
    }

    #[test]
    fn test_latest_at_or_before() {
        let index = PriceIndex::new(&[
            price("apl", "2024-03-01", 170.0),
            price("apl", "2024-01-15", 150.25),
            price("msft", "2024-01-10", 300.0),
        ]);
        assert_eq!(index.len(), 3);
        assert_eq!(index.latest_at_or_before("apl", "2024-01-14"), None);
        assert_eq!(index.latest_at_or_before("apl", "2024-01-15"), Some(("2024-01-15", 150.25)));
        assert_eq!(index.latest_at_or_before("apl", "2024-02-20"), Some(("2024-01-15", 150.25)));
        assert_eq!(index.latest_at_or_before("apl", "2025-01-01"), Some(("2024-03-01", 170.0)));
        assert_eq!(index.latest_at_or_before("nope", "2025-01-01"), None);
    }
}

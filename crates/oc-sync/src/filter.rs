//! Subscription filters for the realtime hub, parsed from WS query params.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub symbols: Option<HashSet<String>>,
    pub statuses: Option<HashSet<String>>,
    pub sides: Option<HashSet<String>>,
    pub user_id: Option<String>,
}

fn normalize_set(values: impl Iterator<Item = String>) -> Option<HashSet<String>> {
    let set: HashSet<String> = values
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty())
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

impl SubscriptionFilter {
    /// Parses comma-separated `symbol`/`symbols`, `status`, `side`, and
    /// `user`/`user_id` query params into a filter.
    pub fn from_query(params: &std::collections::HashMap<String, String>) -> Self {
        let mut symbols = Vec::new();
        if let Some(raw) = params.get("symbol") {
            symbols.extend(raw.split(',').map(str::to_string));
        }
        if let Some(raw) = params.get("symbols") {
            symbols.extend(raw.split(',').map(str::to_string));
        }
        let statuses = params
            .get("status")
            .map(|raw| raw.split(',').map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        let sides = params
            .get("side")
            .map(|raw| raw.split(',').map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        let user_id = params
            .get("user")
            .or_else(|| params.get("user_id"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            symbols: normalize_set(symbols.into_iter()),
            statuses: normalize_set(statuses.into_iter()),
            sides: normalize_set(sides.into_iter()),
            user_id,
        }
    }

    pub fn matches(&self, symbol: &str, status: &str, side: &str, user_id: Option<&str>) -> bool {
        if let Some(symbols) = &self.symbols {
            if !symbols.contains(&symbol.to_uppercase()) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&status.to_uppercase()) {
                return false;
            }
        }
        if let Some(sides) = &self.sides {
            if !sides.contains(&side.to_uppercase()) {
                return false;
            }
        }
        if let Some(expected) = &self.user_id {
            if user_id.unwrap_or("").trim() != expected {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SubscriptionFilter::default();
        assert!(filter.matches("BTCUSDT", "OPEN", "LONG", None));
    }

    #[test]
    fn symbol_filter_is_case_insensitive() {
        let mut params = HashMap::new();
        params.insert("symbol".to_string(), "btcusdt,ethusdt".to_string());
        let filter = SubscriptionFilter::from_query(&params);
        assert!(filter.matches("BTCUSDT", "OPEN", "LONG", None));
        assert!(!filter.matches("SOLUSDT", "OPEN", "LONG", None));
    }

    #[test]
    fn user_id_must_match_exactly() {
        let mut params = HashMap::new();
        params.insert("user".to_string(), "u1".to_string());
        let filter = SubscriptionFilter::from_query(&params);
        assert!(filter.matches("BTCUSDT", "OPEN", "LONG", Some("u1")));
        assert!(!filter.matches("BTCUSDT", "OPEN", "LONG", Some("u2")));
        assert!(!filter.matches("BTCUSDT", "OPEN", "LONG", None));
    }
}

//! Priority bucket configuration for the dispatcher (C1).
//!
//! Ports the bucket order and comparison helpers from the historical
//! `PriorityConfig` used by the rate limiter workflow: a fixed list of
//! named buckets, ordered most urgent first, that the dispatcher drains
//! in strict order whenever more than one bucket is non-empty.

use std::fmt;

/// The fourteen known priority buckets, most urgent first. The literal
/// strings must stay byte-identical to what upstream producers send —
/// they are also used as the PHP-side enum values.
pub const BUCKET_ORDER: [&str; 14] = [
    "position_prior",
    "position",
    "balance",
    "4h-cron",
    "1h-cron",
    "15m-cron",
    "5m-cron",
    "1m-cron",
    "1m",
    "5m",
    "15m",
    "1h",
    "4h",
    "regular",
];

/// A bucket label, validated against [`BUCKET_ORDER`] at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketLabel(String);

impl BucketLabel {
    pub fn new(label: impl Into<String>) -> Result<Self, UnknownBucket> {
        let label = label.into();
        if BUCKET_ORDER.contains(&label.as_str()) {
            Ok(Self(label))
        } else {
            Err(UnknownBucket(label))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BucketLabel {
    type Error = UnknownBucket;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketLabel> for String {
    fn from(value: BucketLabel) -> Self {
        value.0
    }
}

impl fmt::Display for BucketLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBucket(pub String);

impl fmt::Display for UnknownBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown priority bucket: {:?}", self.0)
    }
}

impl std::error::Error for UnknownBucket {}

/// The active ordering of priority buckets. Starts out as [`BUCKET_ORDER`]
/// but can be permuted at runtime via `set_priority_order`, provided the
/// new order is a permutation of the same known set.
#[derive(Debug, Clone)]
pub struct PriorityOrder(Vec<String>);

impl Default for PriorityOrder {
    fn default() -> Self {
        Self(BUCKET_ORDER.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAPermutation;

impl fmt::Display for NotAPermutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("priority order must be a permutation of the known bucket set")
    }
}

impl std::error::Error for NotAPermutation {}

impl PriorityOrder {
    pub fn is_known(&self, bucket: &str) -> bool {
        self.0.iter().any(|b| b == bucket)
    }

    /// Position of `bucket` in the active order, lowest index is most urgent.
    pub fn index_of(&self, bucket: &str) -> Option<usize> {
        self.0.iter().position(|b| b == bucket)
    }

    /// Orders two buckets by urgency. Unknown buckets sort after all known
    /// ones and compare equal to each other.
    pub fn compare(&self, a: &str, b: &str) -> std::cmp::Ordering {
        let ia = self.index_of(a).unwrap_or(usize::MAX);
        let ib = self.index_of(b).unwrap_or(usize::MAX);
        ia.cmp(&ib)
    }

    /// Returns the most urgent bucket that is both non-empty and not paused,
    /// or `None` if nothing is eligible to run.
    pub fn next_non_empty<'a>(
        &'a self,
        non_empty: impl Fn(&str) -> bool,
        paused: impl Fn(&str) -> bool,
    ) -> Option<&'a str> {
        self.0
            .iter()
            .map(|s| s.as_str())
            .find(|b| non_empty(b) && !paused(b))
    }

    /// Replaces the active order. Rejects anything that isn't a permutation
    /// of the current known set, so a typo or a dropped bucket can't
    /// silently starve a queue forever.
    pub fn set_order(&mut self, new_order: Vec<String>) -> Result<(), NotAPermutation> {
        let mut sorted_new = new_order.clone();
        sorted_new.sort();
        let mut sorted_known = self.0.clone();
        sorted_known.sort();
        if sorted_new != sorted_known {
            return Err(NotAPermutation);
        }
        self.0 = new_order;
        Ok(())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_matches_bucket_order() {
        let order = PriorityOrder::default();
        assert_eq!(order.as_slice(), BUCKET_ORDER.as_slice());
    }

    #[test]
    fn position_prior_outranks_regular() {
        let order = PriorityOrder::default();
        assert_eq!(
            order.compare("position_prior", "regular"),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn unknown_bucket_sorts_last_and_ties() {
        let order = PriorityOrder::default();
        assert_eq!(
            order.compare("bogus-a", "bogus-b"),
            std::cmp::Ordering::Equal
        );
        assert_eq!(order.compare("regular", "bogus"), std::cmp::Ordering::Less);
    }

    #[test]
    fn next_non_empty_skips_paused_buckets() {
        let order = PriorityOrder::default();
        let non_empty = |b: &str| b == "position_prior" || b == "regular";
        let paused = |b: &str| b == "position_prior";
        assert_eq!(order.next_non_empty(non_empty, paused), Some("regular"));
    }

    #[test]
    fn next_non_empty_none_when_all_empty_or_paused() {
        let order = PriorityOrder::default();
        assert_eq!(order.next_non_empty(|_| false, |_| false), None);
    }

    #[test]
    fn set_order_accepts_permutation() {
        let mut order = PriorityOrder::default();
        let mut shuffled: Vec<String> = BUCKET_ORDER.iter().map(|s| s.to_string()).collect();
        shuffled.reverse();
        assert!(order.set_order(shuffled.clone()).is_ok());
        assert_eq!(order.as_slice(), shuffled.as_slice());
    }

    #[test]
    fn set_order_rejects_non_permutation() {
        let mut order = PriorityOrder::default();
        let mut bad: Vec<String> = BUCKET_ORDER.iter().map(|s| s.to_string()).collect();
        bad.pop();
        bad.push("not-a-bucket".to_string());
        assert_eq!(order.set_order(bad), Err(NotAPermutation));
    }

    #[test]
    fn bucket_label_rejects_unknown() {
        assert!(BucketLabel::new("regular").is_ok());
        assert!(BucketLabel::new("not-a-bucket").is_err());
    }
}

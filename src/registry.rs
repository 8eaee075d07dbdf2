//! Per-account suspicion accumulator shared by all detectors.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One flagged account, built up across detector passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionEntry {
    pub account_id: String,
    /// First ring the account was assigned to; later hits never replace it.
    pub ring_id: Option<String>,
    /// Human-readable reasons in the order detectors fired.
    pub reasons: Vec<String>,
    /// Pattern-specific fields, last write wins per key.
    pub extra: BTreeMap<String, Value>,
}

/// Mutable registry of suspicious accounts for a single analysis run.
///
/// Entries are created on the first detector hit and mutated by later
/// hits; iteration follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct SuspicionRegistry {
    index: HashMap<String, usize>,
    entries: Vec<SuspicionEntry>,
}

impl SuspicionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag `account_id`, appending `reason` and merging `extra`.
    ///
    /// The ring id only sticks if the entry does not already carry one
    /// (first detector to flag an account owns its canonical ring).
    pub fn mark(&mut self, account_id: &str, reason: String, ring_id: &str, extra: &[(&str, Value)]) {
        let idx = match self.index.get(account_id) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.entries.push(SuspicionEntry {
                    account_id: account_id.to_string(),
                    ring_id: Some(ring_id.to_string()),
                    reasons: Vec::new(),
                    extra: BTreeMap::new(),
                });
                self.index.insert(account_id.to_string(), idx);
                idx
            }
        };

        let entry = &mut self.entries[idx];
        entry.reasons.push(reason);
        if entry.ring_id.is_none() {
            entry.ring_id = Some(ring_id.to_string());
        }
        for (key, value) in extra {
            entry.extra.insert((*key).to_string(), value.clone());
        }
    }

    pub fn get(&self, account_id: &str) -> Option<&SuspicionEntry> {
        self.index.get(account_id).map(|&idx| &self.entries[idx])
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.index.contains_key(account_id)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &SuspicionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries; called at the start of an aggregate analysis.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

/// Mints `<KIND>-NNNN` ring ids, monotonically increasing per kind.
#[derive(Debug)]
pub(crate) struct RingCounter {
    prefix: &'static str,
    next: u32,
}

impl RingCounter {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    pub(crate) fn mint(&mut self) -> String {
        self.next += 1;
        format!("{}-{:04}", self.prefix, self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_creates_then_merges() {
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(3))],
        );
        registry.mark(
            "A",
            "FAN-OUT pattern (12 counterparties in 72h)".to_string(),
            "FAN-OUT-0001",
            &[("counterparty_count", json!(12))],
        );

        let entry = registry.get("A").unwrap();
        assert_eq!(entry.reasons.len(), 2);
        // First-assigned ring wins.
        assert_eq!(entry.ring_id.as_deref(), Some("CYCLE-0001"));
        assert_eq!(entry.extra["cycle_length"], json!(3));
        assert_eq!(entry.extra["counterparty_count"], json!(12));
    }

    #[test]
    fn test_extra_last_write_wins() {
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "first".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(3))],
        );
        registry.mark(
            "A",
            "second".to_string(),
            "CYCLE-0002",
            &[("cycle_length", json!(5))],
        );
        assert_eq!(registry.get("A").unwrap().extra["cycle_length"], json!(5));
    }

    #[test]
    fn test_insertion_order_iteration() {
        let mut registry = SuspicionRegistry::new();
        for account in ["C", "A", "B"] {
            registry.mark(account, "reason".to_string(), "CYCLE-0001", &[]);
        }
        let order: Vec<&str> = registry
            .entries()
            .map(|e| e.account_id.as_str())
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_clear_resets() {
        let mut registry = SuspicionRegistry::new();
        registry.mark("A", "reason".to_string(), "CYCLE-0001", &[]);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("A"));
    }

    #[test]
    fn test_ring_counter_format() {
        let mut counter = RingCounter::new("CYCLE");
        assert_eq!(counter.mint(), "CYCLE-0001");
        assert_eq!(counter.mint(), "CYCLE-0002");
    }
}

//! Suspicion scoring over the registry produced by a detection run.
//!
//! Each component grows with the size of the underlying pattern and is
//! individually capped; the total is capped at 100. Reason strings are
//! the stable contract with the detectors, so the fan and shell
//! parameters are parsed back out of them, with registry extras
//! preferred where they exist.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::registry::{SuspicionEntry, SuspicionRegistry};
use crate::TransactionTable;

/// Scoring weights and gates.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Minimum rolling 24h transaction count that triggers the velocity
    /// component.
    pub velocity_threshold: usize,
    /// Rolling window for the velocity pre-computation, in hours.
    pub velocity_window_hours: i64,
    /// Accounts with at least this many total transactions are skipped.
    pub skip_txn_threshold: usize,
    /// Fan windows at or below this many hours earn the 1.3 multiplier.
    pub fan_multiplier_max_hours: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: 10,
            velocity_window_hours: 24,
            skip_txn_threshold: 50,
            fan_multiplier_max_hours: 72,
        }
    }
}

/// Scored view of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub account_id: String,
    pub ring_id: Option<String>,
    /// Absent when the account is skipped.
    pub score: Option<f64>,
    pub skipped: bool,
    pub has_cycle: bool,
    pub has_fan: bool,
    pub has_shell: bool,
    pub has_velocity: bool,
    pub cycle_length: Option<usize>,
    pub counterparties: Option<usize>,
    pub chain_length: Option<usize>,
    /// Peak rolling-24h transaction count, 0 when below threshold.
    pub velocity_txns: usize,
    pub total_txns: usize,
    /// Reasons joined with "; ".
    pub reasons: String,
}

/// Scores every account in the registry of a completed run.
pub struct SuspicionScorer<'a> {
    registry: &'a SuspicionRegistry,
    config: ScoringConfig,
    tx_counts: BTreeMap<String, usize>,
    velocity: BTreeMap<String, usize>,
    fan_re: Regex,
    shell_re: Regex,
}

impl<'a> SuspicionScorer<'a> {
    pub fn new(table: &TransactionTable, registry: &'a SuspicionRegistry) -> Self {
        Self::with_config(table, registry, ScoringConfig::default())
    }

    pub fn with_config(
        table: &TransactionTable,
        registry: &'a SuspicionRegistry,
        config: ScoringConfig,
    ) -> Self {
        let tx_counts = build_tx_counts(table);
        let velocity = build_velocity(table, &config);
        Self {
            registry,
            config,
            tx_counts,
            velocity,
            fan_re: Regex::new(r"(\d+) counterparties in (\d+)h").unwrap(),
            shell_re: Regex::new(r"length (\d+)").unwrap(),
        }
    }

    /// One record per registry entry, non-skipped first by descending
    /// score, ties broken by account id.
    pub fn score_all(&self) -> Vec<ScoreRecord> {
        let mut records: Vec<ScoreRecord> = self
            .registry
            .entries()
            .map(|entry| self.score_entry(entry))
            .collect();

        records.sort_by(|a, b| {
            a.skipped
                .cmp(&b.skipped)
                .then_with(|| {
                    let sa = a.score.unwrap_or(0.0);
                    let sb = b.score.unwrap_or(0.0);
                    sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.account_id.cmp(&b.account_id))
        });
        records
    }

    fn score_entry(&self, entry: &SuspicionEntry) -> ScoreRecord {
        let total_txns = self.tx_counts.get(&entry.account_id).copied().unwrap_or(0);
        let velocity_txns = self.velocity.get(&entry.account_id).copied().unwrap_or(0);
        let skipped = total_txns >= self.config.skip_txn_threshold;

        let has_cycle = contains_ci(&entry.reasons, "cycle");
        let has_fan = contains_ci(&entry.reasons, "fan-");
        let has_shell = contains_ci(&entry.reasons, "shell");
        let has_velocity = velocity_txns >= self.config.velocity_threshold;

        let cycle_length = extra_usize(entry, "cycle_length");
        let chain_length =
            extra_usize(entry, "chain_length").or_else(|| self.parse_shell_length(entry));
        let fan_params = self.parse_fan_params(entry);

        let score = if skipped {
            // High-activity accounts dilute signal; no components evaluated.
            None
        } else {
            let mut score = 0.0;
            if has_cycle {
                let len = cycle_length.unwrap_or(3);
                score += (30.0 + 3.0 * len.saturating_sub(3) as f64).min(45.0);
            }
            if has_fan {
                let mut component = match fan_params {
                    Some((n, _)) => (20.0 + n.saturating_sub(10) as f64).min(45.0),
                    None => 20.0,
                };
                if let Some((_, hours)) = fan_params {
                    if hours > 0 && hours <= self.config.fan_multiplier_max_hours {
                        component *= 1.3;
                    }
                }
                score += component;
            }
            if has_shell {
                let hops = chain_length.unwrap_or(4).saturating_sub(1);
                score += (15.0 + 4.0 * hops.saturating_sub(3) as f64).min(35.0);
            }
            if has_velocity {
                score += (5.0 + (velocity_txns - self.config.velocity_threshold) as f64).min(15.0);
            }
            Some(crate::round2(score.min(100.0)))
        };

        ScoreRecord {
            account_id: entry.account_id.clone(),
            ring_id: entry.ring_id.clone(),
            score,
            skipped,
            has_cycle,
            has_fan,
            has_shell,
            has_velocity,
            cycle_length,
            counterparties: fan_params.map(|(n, _)| n),
            chain_length,
            velocity_txns,
            total_txns,
            reasons: entry.reasons.join("; "),
        }
    }

    /// Pull `<N> counterparties in <H>h` out of the first fan reason.
    fn parse_fan_params(&self, entry: &SuspicionEntry) -> Option<(usize, i64)> {
        entry
            .reasons
            .iter()
            .filter(|r| r.to_lowercase().contains("fan-"))
            .find_map(|r| {
                let caps = self.fan_re.captures(r)?;
                let n = caps.get(1)?.as_str().parse().ok()?;
                let hours = caps.get(2)?.as_str().parse().ok()?;
                Some((n, hours))
            })
    }

    fn parse_shell_length(&self, entry: &SuspicionEntry) -> Option<usize> {
        entry
            .reasons
            .iter()
            .filter(|r| r.to_lowercase().contains("shell"))
            .find_map(|r| {
                self.shell_re
                    .captures(r)?
                    .get(1)?
                    .as_str()
                    .parse()
                    .ok()
            })
    }
}

fn contains_ci(reasons: &[String], needle: &str) -> bool {
    reasons.iter().any(|r| r.to_lowercase().contains(needle))
}

fn extra_usize(entry: &SuspicionEntry, key: &str) -> Option<usize> {
    entry.extra.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

/// Total appearances as sender or receiver, per account.
fn build_tx_counts(table: &TransactionTable) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for tx in table.rows() {
        *counts.entry(tx.sender_id.clone()).or_default() += 1;
        *counts.entry(tx.receiver_id.clone()).or_default() += 1;
    }
    counts
}

/// Peak rolling-window transaction count per account; accounts below
/// the threshold store 0.
fn build_velocity(table: &TransactionTable, config: &ScoringConfig) -> BTreeMap<String, usize> {
    let mut timestamps: BTreeMap<&str, Vec<chrono::DateTime<chrono::Utc>>> = BTreeMap::new();
    for tx in table.rows() {
        timestamps.entry(tx.sender_id.as_str()).or_default().push(tx.timestamp);
        if tx.receiver_id != tx.sender_id {
            timestamps
                .entry(tx.receiver_id.as_str())
                .or_default()
                .push(tx.timestamp);
        }
    }

    let window = Duration::hours(config.velocity_window_hours);
    let mut velocity = BTreeMap::new();
    for (account, ts) in timestamps {
        // Lists are in table (time) order; each row anchors a window
        // [ts, ts + 24h] including any equal-timestamp rows before it.
        let mut peak = 0usize;
        for &anchor in &ts {
            let end = anchor + window;
            let first = ts.partition_point(|t| *t < anchor);
            let last = ts.partition_point(|t| *t <= end);
            peak = peak.max(last - first);
        }
        let stored = if peak >= config.velocity_threshold { peak } else { 0 };
        velocity.insert(account.to_string(), stored);
    }
    velocity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn tx(id: &str, from: &str, to: &str, amount: f64, hours: i64) -> Transaction {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Transaction {
            transaction_id: id.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            amount,
            timestamp: base + Duration::hours(hours),
        }
    }

    fn small_table() -> TransactionTable {
        TransactionTable::new(vec![
            tx("T1", "A", "B", 2000.0, 0),
            tx("T2", "B", "C", 2000.0, 1),
            tx("T3", "C", "A", 2000.0, 2),
        ])
    }

    #[test]
    fn test_cycle_component_baseline() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(3))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let records = scorer.score_all();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!(r.has_cycle && !r.has_fan && !r.has_shell);
        assert_eq!(r.score, Some(30.0));
        assert_eq!(r.cycle_length, Some(3));
    }

    #[test]
    fn test_cycle_component_grows_and_caps() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(5))],
        );
        registry.mark(
            "B",
            "Participates in transaction cycle CYCLE-0002".to_string(),
            "CYCLE-0002",
            &[("cycle_length", json!(20))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let records = scorer.score_all();

        let a = records.iter().find(|r| r.account_id == "A").unwrap();
        assert_eq!(a.score, Some(36.0)); // 30 + 3 * 2
        let b = records.iter().find(|r| r.account_id == "B").unwrap();
        assert_eq!(b.score, Some(45.0)); // capped
    }

    #[test]
    fn test_fan_component_with_multiplier() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "FAN-IN pattern (15 counterparties in 72h)".to_string(),
            "FAN-IN-0001",
            &[],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];
        // (20 + 5) * 1.3
        assert_eq!(r.score, Some(32.5));
        assert_eq!(r.counterparties, Some(15));
    }

    #[test]
    fn test_fan_component_without_multiplier() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "FAN-OUT pattern (12 counterparties in 168h)".to_string(),
            "FAN-OUT-0001",
            &[],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];
        assert_eq!(r.score, Some(22.0)); // 20 + 2, window too wide for x1.3
    }

    #[test]
    fn test_shell_component_from_reason() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "Shell network chain SHELL-0001 (length 6)".to_string(),
            "SHELL-0001",
            &[("chain_length", json!(6))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];
        // hops = 5 -> 15 + 4 * 2
        assert_eq!(r.score, Some(23.0));
        assert_eq!(r.chain_length, Some(6));
    }

    #[test]
    fn test_velocity_component() {
        // BURST appears in 12 transactions inside 24h.
        let rows: Vec<Transaction> = (0..12)
            .map(|i| tx(&format!("T{i:02}"), "BURST", &format!("D{i}"), 200.0, i))
            .collect();
        let table = TransactionTable::new(rows);
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "BURST",
            "Shell network chain SHELL-0001 (length 4)".to_string(),
            "SHELL-0001",
            &[("chain_length", json!(4))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];

        assert!(r.has_velocity);
        assert_eq!(r.velocity_txns, 12);
        // shell 15 + velocity (5 + 2)
        assert_eq!(r.score, Some(22.0));
    }

    #[test]
    fn test_velocity_below_threshold_stores_zero() {
        // Seven rows in a day is ordinary activity, not a burst.
        let rows: Vec<Transaction> = (0..7)
            .map(|i| tx(&format!("T{i:02}"), "CALM", &format!("D{i}"), 200.0, i * 2))
            .collect();
        let table = TransactionTable::new(rows);
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "CALM",
            "Shell network chain SHELL-0001 (length 4)".to_string(),
            "SHELL-0001",
            &[("chain_length", json!(4))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];

        assert!(!r.has_velocity);
        assert_eq!(r.velocity_txns, 0);
        assert_eq!(r.score, Some(15.0));
    }

    #[test]
    fn test_skip_gate() {
        let mut rows: Vec<Transaction> = (0..60)
            .map(|i| tx(&format!("T{i:03}"), "WHALE", &format!("D{i}"), 100.0, i))
            .collect();
        rows.push(tx("TX", "X", "WHALE", 100.0, 0));
        let table = TransactionTable::new(rows);
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "WHALE",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(3))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];

        assert!(r.skipped);
        assert_eq!(r.score, None);
        assert_eq!(r.total_txns, 61);
        // Flags still reflect the reasons even when skipped.
        assert!(r.has_cycle);
    }

    #[test]
    fn test_sort_order() {
        let mut rows: Vec<Transaction> = (0..60)
            .map(|i| tx(&format!("TW{i:03}"), "WHALE", &format!("D{i}"), 100.0, i))
            .collect();
        rows.push(tx("T1", "A", "B", 2000.0, 0));
        let table = TransactionTable::new(rows);

        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "WHALE",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[],
        );
        registry.mark(
            "B",
            "Participates in transaction cycle CYCLE-0002".to_string(),
            "CYCLE-0002",
            &[("cycle_length", json!(5))],
        );
        registry.mark(
            "A",
            "Shell network chain SHELL-0001 (length 4)".to_string(),
            "SHELL-0001",
            &[("chain_length", json!(4))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let records = scorer.score_all();

        let order: Vec<&str> = records.iter().map(|r| r.account_id.as_str()).collect();
        // Highest score first, skipped last.
        assert_eq!(order, vec!["B", "A", "WHALE"]);
    }

    #[test]
    fn test_total_score_capped_at_100() {
        let table = small_table();
        let mut registry = SuspicionRegistry::new();
        registry.mark(
            "A",
            "Participates in transaction cycle CYCLE-0001".to_string(),
            "CYCLE-0001",
            &[("cycle_length", json!(20))],
        );
        registry.mark(
            "A",
            "FAN-IN pattern (60 counterparties in 24h)".to_string(),
            "FAN-IN-0001",
            &[],
        );
        registry.mark(
            "A",
            "Shell network chain SHELL-0001 (length 12)".to_string(),
            "SHELL-0001",
            &[("chain_length", json!(12))],
        );
        let scorer = SuspicionScorer::new(&table, &registry);
        let r = &scorer.score_all()[0];
        // 45 + 45 * 1.3 + 35 caps at 100.
        assert_eq!(r.score, Some(100.0));
    }
}

//! Circular money-flow detection.
//!
//! Cycles are enumerated per strongly connected component with a hard
//! per-component cap, so dense graphs degrade by truncation rather than
//! by blowing up.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::graph::TransactionGraph;
use crate::registry::{RingCounter, SuspicionRegistry};

/// Cycle detection thresholds.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Minimum cycle length in nodes.
    pub min_len: usize,
    /// Maximum cycle length in nodes.
    pub max_len: usize,
    /// Cycles moving less than this total are treated as noise.
    pub min_total_amount: f64,
    /// Enumeration cap per strongly connected component.
    pub max_cycles_per_component: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_len: 3,
            max_len: 5,
            min_total_amount: 1_000.0,
            max_cycles_per_component: 10_000,
        }
    }
}

/// A detected circular flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRing {
    pub ring_id: String,
    /// Accounts in cycle order, starting from the smallest account id.
    pub accounts: Vec<String>,
    pub cycle_length: usize,
    pub total_amount: f64,
    pub tx_ids: Vec<String>,
}

/// Finds simple directed cycles of bounded length.
#[derive(Debug, Clone, Default)]
pub struct CycleDetector {
    config: CycleConfig,
}

impl CycleDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CycleConfig) -> Self {
        Self { config }
    }

    /// Detect cycles, record rings, and mark every participant.
    ///
    /// Components smaller than `min_len` cannot hold a qualifying cycle
    /// and are skipped outright. Cycles over the same node set collapse
    /// to the first one enumerated.
    pub fn detect(
        &self,
        graph: &TransactionGraph,
        registry: &mut SuspicionRegistry,
    ) -> Vec<CycleRing> {
        let mut rings = Vec::new();
        let mut counter = RingCounter::new("CYCLE");
        let mut seen: HashSet<Vec<String>> = HashSet::new();

        for component in graph.strongly_connected_components() {
            if component.len() < self.config.min_len {
                continue;
            }
            let members: BTreeSet<&str> = component.iter().map(String::as_str).collect();

            let mut enumerated = 0usize;
            let mut cycles: Vec<Vec<String>> = Vec::new();
            for start in &component {
                if enumerated >= self.config.max_cycles_per_component {
                    debug!(
                        component_size = component.len(),
                        cap = self.config.max_cycles_per_component,
                        "cycle enumeration truncated"
                    );
                    break;
                }
                let mut path: Vec<&str> = vec![start.as_str()];
                self.extend_path(
                    graph,
                    &members,
                    start,
                    &mut path,
                    &mut enumerated,
                    &mut seen,
                    &mut cycles,
                );
            }

            for cycle in cycles {
                let mut total_amount = 0.0;
                let mut tx_ids: Vec<String> = Vec::new();
                for (i, node) in cycle.iter().enumerate() {
                    let next = &cycle[(i + 1) % cycle.len()];
                    if let Some(edge) = graph.edge(node, next) {
                        total_amount += edge.weight;
                        tx_ids.extend(edge.tx_ids.iter().cloned());
                    }
                }
                // Bill-splitting and other small circular flows are noise.
                if total_amount < self.config.min_total_amount {
                    continue;
                }

                let ring_id = counter.mint();
                for account in &cycle {
                    registry.mark(
                        account,
                        format!("Participates in transaction cycle {ring_id}"),
                        &ring_id,
                        &[("cycle_length", json!(cycle.len()))],
                    );
                }
                rings.push(CycleRing {
                    ring_id,
                    cycle_length: cycle.len(),
                    accounts: cycle,
                    total_amount: crate::round2(total_amount),
                    tx_ids,
                });
            }
        }

        debug!(rings = rings.len(), "cycle detection complete");
        rings
    }

    /// Depth-first path extension anchored at `start`.
    ///
    /// Only nodes greater than `start` may join the path, so every cycle
    /// is enumerated exactly once, rooted at its smallest member. Depth
    /// is bounded by `max_len`.
    #[allow(clippy::too_many_arguments)]
    fn extend_path<'g>(
        &self,
        graph: &'g TransactionGraph,
        members: &BTreeSet<&'g str>,
        start: &str,
        path: &mut Vec<&'g str>,
        enumerated: &mut usize,
        seen: &mut HashSet<Vec<String>>,
        out: &mut Vec<Vec<String>>,
    ) {
        if *enumerated >= self.config.max_cycles_per_component {
            return;
        }
        let current = path[path.len() - 1];
        for next in graph.successors(current) {
            if *enumerated >= self.config.max_cycles_per_component {
                return;
            }
            if !members.contains(next) {
                continue;
            }
            if next == start {
                if path.len() >= self.config.min_len {
                    *enumerated += 1;
                    let mut key: Vec<String> =
                        path.iter().map(|n| n.to_string()).collect();
                    key.sort();
                    if seen.insert(key) {
                        out.push(path.iter().map(|n| n.to_string()).collect());
                    }
                }
                continue;
            }
            if next < start || path.contains(&next) {
                continue;
            }
            if path.len() < self.config.max_len {
                path.push(next);
                self.extend_path(graph, members, start, path, enumerated, seen, out);
                path.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Transaction, TransactionTable};
    use chrono::{Duration, TimeZone, Utc};

    fn table(rows: Vec<(&str, &str, f64)>) -> TransactionTable {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TransactionTable::new(
            rows.into_iter()
                .enumerate()
                .map(|(i, (from, to, amount))| Transaction {
                    transaction_id: format!("T{:04}", i + 1),
                    sender_id: from.to_string(),
                    receiver_id: to.to_string(),
                    amount,
                    timestamp: base + Duration::hours(i as i64),
                })
                .collect(),
        )
    }

    #[test]
    fn test_triangle_cycle_detected() {
        let table = table(vec![
            ("A", "B", 2000.0),
            ("B", "C", 2000.0),
            ("C", "A", 2000.0),
        ]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);

        assert_eq!(rings.len(), 1);
        let ring = &rings[0];
        assert_eq!(ring.ring_id, "CYCLE-0001");
        assert_eq!(ring.cycle_length, 3);
        assert_eq!(ring.total_amount, 6000.0);
        assert_eq!(ring.tx_ids.len(), 3);

        for account in ["A", "B", "C"] {
            let entry = registry.get(account).unwrap();
            assert_eq!(entry.ring_id.as_deref(), Some("CYCLE-0001"));
            assert!(entry.reasons[0].contains("CYCLE-0001"));
            assert_eq!(entry.extra["cycle_length"], json!(3));
        }
    }

    #[test]
    fn test_small_amount_cycle_filtered() {
        let table = table(vec![
            ("A", "B", 300.0),
            ("B", "C", 300.0),
            ("C", "A", 300.0),
        ]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);

        assert!(rings.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_two_node_cycle_ignored() {
        let table = table(vec![("A", "B", 5000.0), ("B", "A", 5000.0)]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);
        assert!(rings.is_empty());
    }

    #[test]
    fn test_cycle_longer_than_max_len_ignored() {
        let table = table(vec![
            ("A", "B", 2000.0),
            ("B", "C", 2000.0),
            ("C", "D", 2000.0),
            ("D", "E", 2000.0),
            ("E", "F", 2000.0),
            ("F", "A", 2000.0),
        ]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);
        assert!(rings.is_empty());
    }

    #[test]
    fn test_same_node_set_collapses() {
        // A->B->C->A and A->C->B->A share a node set; only the first
        // enumerated survives dedup.
        let table = table(vec![
            ("A", "B", 2000.0),
            ("B", "C", 2000.0),
            ("C", "A", 2000.0),
            ("A", "C", 2000.0),
            ("C", "B", 2000.0),
            ("B", "A", 2000.0),
        ]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);
        assert_eq!(rings.len(), 1);
    }

    #[test]
    fn test_disjoint_cycles_numbered_in_order() {
        let table = table(vec![
            ("P", "Q", 2000.0),
            ("Q", "R", 2000.0),
            ("R", "P", 2000.0),
            ("A", "B", 2000.0),
            ("B", "C", 2000.0),
            ("C", "A", 2000.0),
        ]);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let rings = CycleDetector::new().detect(&graph, &mut registry);

        assert_eq!(rings.len(), 2);
        // Components are discovered in account-id order, so the A cycle
        // mints first.
        assert_eq!(rings[0].ring_id, "CYCLE-0001");
        assert_eq!(rings[0].accounts[0], "A");
        assert_eq!(rings[1].ring_id, "CYCLE-0002");
        assert_eq!(rings[1].accounts[0], "P");
    }

    #[test]
    fn test_enumeration_cap_truncates() {
        // Complete digraph on 6 nodes has far more than 3 simple cycles
        // of length 3..=5; a tiny cap must truncate silently.
        let mut rows = Vec::new();
        let names = ["A", "B", "C", "D", "E", "F"];
        for from in names {
            for to in names {
                if from != to {
                    rows.push((from, to, 2000.0));
                }
            }
        }
        let table = table(rows);
        let graph = TransactionGraph::from_table(&table);
        let mut registry = SuspicionRegistry::new();
        let detector = CycleDetector::with_config(CycleConfig {
            max_cycles_per_component: 3,
            ..Default::default()
        });
        let rings = detector.detect(&graph, &mut registry);
        assert!(rings.len() <= 3);
        assert!(!rings.is_empty());
    }
}

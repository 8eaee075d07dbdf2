//! Shell-network chain detection: layering through low-activity
//! pass-through accounts.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::graph::TransactionGraph;
use crate::registry::{RingCounter, SuspicionRegistry};
use crate::TransactionTable;

/// Shell-chain thresholds.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Maximum total transactions (sent + received) for an account to
    /// count as a shell.
    pub max_txns: usize,
    /// Minimum hops; chains need at least `min_hops + 1` nodes.
    pub min_hops: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_txns: 5,
            min_hops: 3,
        }
    }
}

/// A maximal chain of shell accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRing {
    pub ring_id: String,
    /// Accounts in chain order, entry point first.
    pub accounts: Vec<String>,
    pub hops: usize,
    pub total_amount: f64,
    pub tx_ids: Vec<String>,
}

/// Walks maximal chains through the shell-account subgraph.
#[derive(Debug, Clone, Default)]
pub struct ShellChainDetector {
    config: ShellConfig,
}

struct Frame<'g> {
    successors: Vec<&'g str>,
    next: usize,
    extended: bool,
}

impl ShellChainDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Detect shell chains, record rings, and mark every member.
    ///
    /// Walks start from shell accounts with no shell predecessor and
    /// follow shell successors only; a path is emitted when it cannot be
    /// extended and spans at least `min_hops + 1` nodes. Paths are
    /// deduplicated by their exact node sequence.
    pub fn detect(
        &self,
        graph: &TransactionGraph,
        table: &TransactionTable,
        registry: &mut SuspicionRegistry,
    ) -> Vec<ShellRing> {
        let mut tx_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tx in table.rows() {
            *tx_counts.entry(tx.sender_id.as_str()).or_default() += 1;
            *tx_counts.entry(tx.receiver_id.as_str()).or_default() += 1;
        }
        let shell: BTreeSet<&str> = tx_counts
            .iter()
            .filter(|(_, &count)| count <= self.config.max_txns)
            .map(|(&account, _)| account)
            .collect();

        let mut rings = Vec::new();
        let mut counter = RingCounter::new("SHELL");
        let mut seen_paths: HashSet<Vec<String>> = HashSet::new();

        for &entry in &shell {
            let has_shell_predecessor =
                graph.predecessors(entry).any(|p| shell.contains(p));
            if has_shell_predecessor {
                continue;
            }
            self.walk(
                graph,
                &shell,
                entry,
                &mut seen_paths,
                &mut counter,
                registry,
                &mut rings,
            );
        }

        debug!(
            shell_accounts = shell.len(),
            rings = rings.len(),
            "shell chain detection complete"
        );
        rings
    }

    /// Iterative depth-first walk from one entry point.
    #[allow(clippy::too_many_arguments)]
    fn walk<'g>(
        &self,
        graph: &'g TransactionGraph,
        shell: &BTreeSet<&'g str>,
        entry: &'g str,
        seen_paths: &mut HashSet<Vec<String>>,
        counter: &mut RingCounter,
        registry: &mut SuspicionRegistry,
        rings: &mut Vec<ShellRing>,
    ) {
        let mut path: Vec<&str> = vec![entry];
        let mut on_path: HashSet<&str> = HashSet::from([entry]);
        let mut frames = vec![Frame {
            successors: graph.successors(entry).collect(),
            next: 0,
            extended: false,
        }];

        loop {
            let candidate = match frames.last_mut() {
                None => break,
                Some(frame) => {
                    let mut found = None;
                    while frame.next < frame.successors.len() {
                        let succ = frame.successors[frame.next];
                        frame.next += 1;
                        if shell.contains(succ) && !on_path.contains(succ) {
                            frame.extended = true;
                            found = Some(succ);
                            break;
                        }
                    }
                    found
                }
            };

            if let Some(node) = candidate {
                path.push(node);
                on_path.insert(node);
                frames.push(Frame {
                    successors: graph.successors(node).collect(),
                    next: 0,
                    extended: false,
                });
                continue;
            }

            // Frame exhausted; a never-extended tip marks a maximal path.
            if let Some(frame) = frames.pop() {
                if !frame.extended && path.len() >= self.config.min_hops + 1 {
                    let owned: Vec<String> = path.iter().map(|n| n.to_string()).collect();
                    if seen_paths.insert(owned.clone()) {
                        self.emit(graph, owned, counter, registry, rings);
                    }
                }
            }
            if let Some(done) = path.pop() {
                on_path.remove(done);
            }
        }
    }

    fn emit(
        &self,
        graph: &TransactionGraph,
        accounts: Vec<String>,
        counter: &mut RingCounter,
        registry: &mut SuspicionRegistry,
        rings: &mut Vec<ShellRing>,
    ) {
        let mut total_amount = 0.0;
        let mut tx_ids: Vec<String> = Vec::new();
        for pair in accounts.windows(2) {
            if let Some(edge) = graph.edge(&pair[0], &pair[1]) {
                total_amount += edge.weight;
                tx_ids.extend(edge.tx_ids.iter().cloned());
            }
        }

        let ring_id = counter.mint();
        let length = accounts.len();
        for account in &accounts {
            registry.mark(
                account,
                format!("Shell network chain {ring_id} (length {length})"),
                &ring_id,
                &[("chain_length", json!(length))],
            );
        }
        rings.push(ShellRing {
            ring_id,
            hops: length - 1,
            accounts,
            total_amount: crate::round2(total_amount),
            tx_ids,
        });
    }
}

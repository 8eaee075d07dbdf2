//! Directed weighted transaction graph and strongly connected components.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{Transaction, TransactionTable};

/// Aggregated edge between an ordered (sender, receiver) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    /// Sum of all transaction amounts on this edge.
    pub weight: f64,
    /// Number of transactions collapsed into this edge.
    pub tx_count: usize,
    /// Transaction ids in table order.
    pub tx_ids: Vec<String>,
}

/// Directed graph with at most one edge per ordered account pair.
///
/// Adjacency is kept in ordered maps so that every traversal is
/// deterministic for identical input, independent of row order.
#[derive(Debug, Clone, Default)]
pub struct TransactionGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<(String, String), EdgeData>,
    successors: BTreeMap<String, BTreeSet<String>>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl TransactionGraph {
    /// Build the graph by collapsing the table into weighted edges.
    ///
    /// Each (sender, receiver) pair becomes a single edge carrying the
    /// summed amount, the transaction count, and the originating ids in
    /// table order. An empty table produces an empty graph.
    pub fn from_table(table: &TransactionTable) -> Self {
        let mut graph = Self::default();
        for tx in table.rows() {
            graph.add_transaction(tx);
        }
        graph
    }

    fn add_transaction(&mut self, tx: &Transaction) {
        self.nodes.insert(tx.sender_id.clone());
        self.nodes.insert(tx.receiver_id.clone());

        let key = (tx.sender_id.clone(), tx.receiver_id.clone());
        let edge = self.edges.entry(key).or_insert_with(|| EdgeData {
            weight: 0.0,
            tx_count: 0,
            tx_ids: Vec::new(),
        });
        edge.weight += tx.amount;
        edge.tx_count += 1;
        edge.tx_ids.push(tx.transaction_id.clone());

        self.successors
            .entry(tx.sender_id.clone())
            .or_default()
            .insert(tx.receiver_id.clone());
        self.predecessors
            .entry(tx.receiver_id.clone())
            .or_default()
            .insert(tx.sender_id.clone());
    }

    /// Look up the aggregated edge from `sender` to `receiver`.
    pub fn edge(&self, sender: &str, receiver: &str) -> Option<&EdgeData> {
        self.edges
            .get(&(sender.to_string(), receiver.to_string()))
    }

    /// Accounts this node sends to, in account-id order.
    pub fn successors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.successors
            .get(node)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Accounts sending to this node, in account-id order.
    pub fn predecessors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.predecessors
            .get(node)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// All account ids present as sender or receiver, in order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Strongly connected components via iterative Tarjan.
    ///
    /// Nodes are visited in account-id order, so component discovery
    /// (and hence everything downstream, ring-id numbering included) is
    /// stable for identical input. Each component's member list is
    /// returned sorted.
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let order: Vec<&str> = self.nodes().collect();
        let index_of: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let n = order.len();
        let mut index = vec![usize::MAX; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut components: Vec<Vec<String>> = Vec::new();

        // Explicit DFS frames: (node, resumable successor iterator position).
        enum Frame {
            Visit(usize),
            Resume(usize, usize),
        }

        for start in 0..n {
            if index[start] != usize::MAX {
                continue;
            }
            let mut frames = vec![Frame::Visit(start)];
            while let Some(frame) = frames.pop() {
                let (v, succ_pos) = match frame {
                    Frame::Visit(v) => {
                        index[v] = next_index;
                        lowlink[v] = next_index;
                        next_index += 1;
                        stack.push(v);
                        on_stack[v] = true;
                        (v, 0)
                    }
                    Frame::Resume(v, pos) => {
                        // A child finished; fold its lowlink into ours.
                        let succs: Vec<usize> = self
                            .successors(order[v])
                            .map(|s| index_of[s])
                            .collect();
                        let child = succs[pos - 1];
                        lowlink[v] = lowlink[v].min(lowlink[child]);
                        (v, pos)
                    }
                };

                let succs: Vec<usize> = self
                    .successors(order[v])
                    .map(|s| index_of[s])
                    .collect();
                let mut advanced = false;
                for (pos, &w) in succs.iter().enumerate().skip(succ_pos) {
                    if index[w] == usize::MAX {
                        frames.push(Frame::Resume(v, pos + 1));
                        frames.push(Frame::Visit(w));
                        advanced = true;
                        break;
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                }
                if advanced {
                    continue;
                }

                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(order[w].to_string());
                        if w == v {
                            break;
                        }
                    }
                    component.sort();
                    components.push(component);
                }
            }
        }

        components
    }
}

//! Structuring (smurfing) detection: coordinated deposits kept just
//! below a regulatory reporting ceiling.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::legitimacy::LegitimacyClassifier;
use crate::registry::{RingCounter, SuspicionRegistry};
use crate::{Transaction, TransactionTable};

/// Structuring thresholds (FinCEN CTR-style ceiling by default).
#[derive(Debug, Clone)]
pub struct StructuringConfig {
    /// Reporting ceiling the deposits stay under.
    pub amount_ceiling: f64,
    /// Band below the ceiling that counts as "just under", as a
    /// fraction: 0.08 means [ceiling * 0.92, ceiling).
    pub band: f64,
    /// Minimum distinct senders within the window.
    pub min_senders: usize,
    /// Rolling window length in hours.
    pub window_hours: i64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            amount_ceiling: 10_000.0,
            band: 0.08,
            min_senders: 5,
            window_hours: 168,
        }
    }
}

/// A detected structuring pattern around one receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuringRing {
    pub ring_id: String,
    pub account_id: String,
    /// Distinct senders inside the window.
    pub counterparty_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_amount: f64,
    pub tx_ids: Vec<String>,
    pub amount_ceiling: f64,
}

/// Finds receivers collecting in-band deposits from many senders.
#[derive(Debug, Clone, Default)]
pub struct StructuringDetector {
    config: StructuringConfig,
}

impl StructuringDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StructuringConfig) -> Self {
        Self { config }
    }

    /// Detect structuring, at most one finding per receiver.
    ///
    /// As with fan patterns, the ring is always recorded and the
    /// legitimacy classifier only gates the suspicion mark.
    pub fn detect(
        &self,
        table: &TransactionTable,
        classifier: &LegitimacyClassifier,
        registry: &mut SuspicionRegistry,
    ) -> Vec<StructuringRing> {
        let floor = self.config.amount_ceiling * (1.0 - self.config.band);

        // In-band rows only, grouped by receiver in account-id order.
        let mut by_receiver: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
        for tx in table.rows() {
            if tx.amount >= floor && tx.amount < self.config.amount_ceiling {
                by_receiver.entry(tx.receiver_id.as_str()).or_default().push(tx);
            }
        }

        let mut rings = Vec::new();
        let mut counter = RingCounter::new("STRUCT");
        let window = Duration::hours(self.config.window_hours);

        for (receiver, txs) in by_receiver {
            if txs.len() < self.config.min_senders {
                continue;
            }
            for anchor in &txs {
                let window_end = anchor.timestamp + window;
                let in_window: Vec<&&Transaction> = txs
                    .iter()
                    .filter(|tx| tx.timestamp >= anchor.timestamp && tx.timestamp <= window_end)
                    .collect();
                let senders: HashSet<&str> = in_window
                    .iter()
                    .map(|tx| tx.sender_id.as_str())
                    .collect();
                if senders.len() < self.config.min_senders {
                    continue;
                }

                let ring_id = counter.mint();
                let total_amount: f64 = in_window.iter().map(|tx| tx.amount).sum();
                let tx_ids: Vec<String> = in_window
                    .iter()
                    .map(|tx| tx.transaction_id.clone())
                    .collect();
                let reason = format!(
                    "Structuring pattern ({} senders just below {:.0} in {}h)",
                    senders.len(),
                    self.config.amount_ceiling,
                    self.config.window_hours
                );

                if classifier.is_likely_legitimate(receiver, table) {
                    debug!(receiver, ring_id = %ring_id, "receiver classified legitimate, not marked");
                } else {
                    registry.mark(
                        receiver,
                        reason,
                        &ring_id,
                        &[
                            ("counterparty_count", json!(senders.len())),
                            ("amount_ceiling", json!(self.config.amount_ceiling)),
                        ],
                    );
                }

                rings.push(StructuringRing {
                    ring_id,
                    account_id: receiver.to_string(),
                    counterparty_count: senders.len(),
                    window_start: anchor.timestamp,
                    window_end,
                    total_amount: crate::round2(total_amount),
                    tx_ids,
                    amount_ceiling: self.config.amount_ceiling,
                });
                break;
            }
        }

        debug!(rings = rings.len(), "structuring detection complete");
        rings
    }
}

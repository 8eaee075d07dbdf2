//! Fan-in / fan-out detection: rapid aggregation or dispersal of funds
//! across many counterparties inside a rolling window.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::legitimacy::LegitimacyClassifier;
use crate::registry::{RingCounter, SuspicionRegistry};
use crate::{Transaction, TransactionTable};

/// Fan detection thresholds.
#[derive(Debug, Clone)]
pub struct FanConfig {
    /// Minimum distinct counterparties within the window.
    pub threshold: usize,
    /// Rolling window length in hours.
    pub window_hours: i64,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window_hours: 72,
        }
    }
}

/// Direction of a fan pattern relative to the hub account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanDirection {
    /// Hub is the receiver: funds converge on it.
    In,
    /// Hub is the sender: funds disperse from it.
    Out,
}

impl FanDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanDirection::In => "FAN-IN",
            FanDirection::Out => "FAN-OUT",
        }
    }
}

impl std::fmt::Display for FanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected fan pattern, one per (account, direction) at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanRing {
    pub ring_id: String,
    pub account_id: String,
    pub direction: FanDirection,
    pub counterparty_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_amount: f64,
    pub tx_ids: Vec<String>,
}

/// Finds hub accounts with many distinct counterparties in a window.
#[derive(Debug, Clone, Default)]
pub struct FanDetector {
    config: FanConfig,
}

impl FanDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FanConfig) -> Self {
        Self { config }
    }

    /// Detect fan-in then fan-out hubs.
    ///
    /// Rings are always recorded; the legitimacy classifier only gates
    /// whether the hub lands in the registry, keeping payroll and
    /// merchant hubs out of the suspect list.
    pub fn detect(
        &self,
        table: &TransactionTable,
        classifier: &LegitimacyClassifier,
        registry: &mut SuspicionRegistry,
    ) -> Vec<FanRing> {
        let mut rings = Vec::new();
        for direction in [FanDirection::In, FanDirection::Out] {
            let mut counter = RingCounter::new(match direction {
                FanDirection::In => "FAN-IN",
                FanDirection::Out => "FAN-OUT",
            });
            self.detect_direction(table, classifier, registry, direction, &mut counter, &mut rings);
        }
        debug!(rings = rings.len(), "fan detection complete");
        rings
    }

    fn detect_direction(
        &self,
        table: &TransactionTable,
        classifier: &LegitimacyClassifier,
        registry: &mut SuspicionRegistry,
        direction: FanDirection,
        counter: &mut RingCounter,
        rings: &mut Vec<FanRing>,
    ) {
        // Group rows by hub account; table order is already time order.
        let mut by_account: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
        for tx in table.rows() {
            let hub = match direction {
                FanDirection::In => tx.receiver_id.as_str(),
                FanDirection::Out => tx.sender_id.as_str(),
            };
            by_account.entry(hub).or_default().push(tx);
        }

        let window = Duration::hours(self.config.window_hours);
        for (account, txs) in by_account {
            // Fewer rows than the threshold cannot reach it.
            if txs.len() < self.config.threshold {
                continue;
            }

            for anchor in &txs {
                let window_end = anchor.timestamp + window;
                let in_window: Vec<&&Transaction> = txs
                    .iter()
                    .filter(|tx| tx.timestamp >= anchor.timestamp && tx.timestamp <= window_end)
                    .collect();

                let counterparties: HashSet<&str> = in_window
                    .iter()
                    .map(|tx| match direction {
                        FanDirection::In => tx.sender_id.as_str(),
                        FanDirection::Out => tx.receiver_id.as_str(),
                    })
                    .collect();
                if counterparties.len() < self.config.threshold {
                    continue;
                }

                let ring_id = counter.mint();
                let total_amount: f64 = in_window.iter().map(|tx| tx.amount).sum();
                let tx_ids: Vec<String> = in_window
                    .iter()
                    .map(|tx| tx.transaction_id.clone())
                    .collect();
                let reason = format!(
                    "{} pattern ({} counterparties in {}h)",
                    direction,
                    counterparties.len(),
                    self.config.window_hours
                );

                if classifier.is_likely_legitimate(account, table) {
                    debug!(account, ring_id = %ring_id, "fan hub classified legitimate, not marked");
                } else {
                    registry.mark(
                        account,
                        reason,
                        &ring_id,
                        &[
                            ("counterparty_count", json!(counterparties.len())),
                            ("fan_window_hours", json!(self.config.window_hours)),
                        ],
                    );
                }

                rings.push(FanRing {
                    ring_id,
                    account_id: account.to_string(),
                    direction,
                    counterparty_count: counterparties.len(),
                    window_start: anchor.timestamp,
                    window_end,
                    total_amount: crate::round2(total_amount),
                    tx_ids,
                });
                // One finding per (account, direction) is enough.
                break;
            }
        }
    }
}

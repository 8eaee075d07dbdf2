//! # Fraud Ring Detector
//!
//! Graph-based detection of money-laundering patterns in batches of
//! financial transactions.
//!
//! ## Features
//!
//! - **Cycle Detection**: Circular money flows found per strongly
//!   connected component with bounded enumeration
//! - **Fan Analysis**: Rapid aggregation (fan-in) and dispersal
//!   (fan-out) across many counterparties in a rolling window
//! - **Shell Chains**: Layering through chains of low-activity
//!   pass-through accounts
//! - **Structuring Detection**: Coordinated deposits kept just below a
//!   reporting ceiling
//! - **Legitimacy Heuristics**: Payroll and merchant hubs are kept off
//!   the suspect list
//! - **Suspicion Scoring**: Bounded 0-100 severity per flagged account
//!   with explanatory flags
//!
//! One analysis run owns its transaction table, graph, and suspicion
//! registry exclusively; the assembled [`report::AnalysisReport`] is the
//! only output that survives the run.

pub mod cycle_detection;
pub mod fan_patterns;
pub mod graph;
pub mod ingest;
pub mod legitimacy;
pub mod registry;
pub mod report;
pub mod scoring;
pub mod shell_chains;
pub mod structuring;

pub use cycle_detection::{CycleConfig, CycleDetector, CycleRing};
pub use fan_patterns::{FanConfig, FanDetector, FanDirection, FanRing};
pub use graph::{EdgeData, TransactionGraph};
pub use legitimacy::{LegitimacyClassifier, LegitimacyConfig};
pub use registry::{SuspicionEntry, SuspicionRegistry};
pub use report::AnalysisReport;
pub use scoring::{ScoreRecord, ScoringConfig, SuspicionScorer};
pub use shell_chains::{ShellChainDetector, ShellConfig, ShellRing};
pub use structuring::{StructuringConfig, StructuringDetector, StructuringRing};

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Engine errors; detectors themselves never fail, only construction
/// and serialization can.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("input is missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("unparseable amount {value:?} on line {line}")]
    InvalidAmount { line: u64, value: String },

    #[error("unparseable timestamp {value:?} on line {line}")]
    InvalidTimestamp { line: u64, value: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single financial transaction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable, time-sorted batch of transactions.
///
/// Rows are ordered by `(timestamp, transaction_id)` on construction,
/// so the same rows in any input order produce the same table and the
/// same analysis output.
#[derive(Debug, Clone, Default)]
pub struct TransactionTable {
    rows: Vec<Transaction>,
}

impl TransactionTable {
    pub fn new(mut rows: Vec<Transaction>) -> Self {
        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        Self { rows }
    }

    pub fn rows(&self) -> &[Transaction] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct account ids over senders and receivers, in order.
    pub fn accounts(&self) -> BTreeSet<String> {
        let mut accounts = BTreeSet::new();
        for tx in &self.rows {
            accounts.insert(tx.sender_id.clone());
            accounts.insert(tx.receiver_id.clone());
        }
        accounts
    }

    /// SHA-256 digest over the canonical row encoding, for audit logs
    /// and determinism checks.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for tx in &self.rows {
            hasher.update(tx.transaction_id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(tx.sender_id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(tx.receiver_id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(tx.amount.to_le_bytes());
            hasher.update(tx.timestamp.timestamp_millis().to_le_bytes());
            hasher.update([0x0a]);
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

/// All detector and scorer settings for one engine.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub cycle: CycleConfig,
    pub fan: FanConfig,
    pub shell: ShellConfig,
    pub structuring: StructuringConfig,
    pub legitimacy: LegitimacyConfig,
    pub scoring: ScoringConfig,
}

/// Raw ring lists from one detection pass, in detector order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub cycles: Vec<CycleRing>,
    pub fans: Vec<FanRing>,
    pub shells: Vec<ShellRing>,
    pub structuring: Vec<StructuringRing>,
}

impl DetectionOutcome {
    pub fn total_rings(&self) -> usize {
        self.cycles.len() + self.fans.len() + self.shells.len() + self.structuring.len()
    }
}

/// Single-run fraud detection engine.
///
/// Owns the table, the derived graph, and the suspicion registry for
/// the duration of one batch analysis.
pub struct FraudDetectionEngine {
    table: TransactionTable,
    graph: TransactionGraph,
    registry: SuspicionRegistry,
    classifier: LegitimacyClassifier,
    config: AnalysisConfig,
}

impl FraudDetectionEngine {
    /// Create an engine with default thresholds.
    pub fn new(table: TransactionTable) -> Self {
        Self::with_config(table, AnalysisConfig::default())
    }

    /// Create an engine with custom thresholds.
    pub fn with_config(table: TransactionTable, config: AnalysisConfig) -> Self {
        let graph = TransactionGraph::from_table(&table);
        let classifier = LegitimacyClassifier::with_config(config.legitimacy.clone());
        Self {
            table,
            graph,
            registry: SuspicionRegistry::new(),
            classifier,
            config,
        }
    }

    /// Load a CSV batch and build an engine over it.
    ///
    /// This is the construction boundary: a missing column or a bad row
    /// fails here, before any analysis starts.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        Ok(Self::new(ingest::read_csv_path(path)?))
    }

    pub fn table(&self) -> &TransactionTable {
        &self.table
    }

    pub fn graph(&self) -> &TransactionGraph {
        &self.graph
    }

    pub fn registry(&self) -> &SuspicionRegistry {
        &self.registry
    }

    /// Run all detectors in order: CYCLE, FAN, SHELL, STRUCTURING.
    ///
    /// Clears the registry first, so repeated calls re-derive the same
    /// state. The order is observable: the first detector to flag an
    /// account owns its canonical ring id.
    pub fn analyse(&mut self) -> DetectionOutcome {
        self.registry.clear();
        info!(
            transactions = self.table.len(),
            accounts = self.graph.node_count(),
            fingerprint = %self.table.fingerprint(),
            "starting analysis run"
        );

        let cycles = CycleDetector::with_config(self.config.cycle.clone())
            .detect(&self.graph, &mut self.registry);
        let fans = FanDetector::with_config(self.config.fan.clone()).detect(
            &self.table,
            &self.classifier,
            &mut self.registry,
        );
        let shells = ShellChainDetector::with_config(self.config.shell.clone()).detect(
            &self.graph,
            &self.table,
            &mut self.registry,
        );
        let structuring = StructuringDetector::with_config(self.config.structuring.clone())
            .detect(&self.table, &self.classifier, &mut self.registry);

        let outcome = DetectionOutcome {
            cycles,
            fans,
            shells,
            structuring,
        };
        info!(
            suspicious_accounts = self.registry.len(),
            rings = outcome.total_rings(),
            "analysis run complete"
        );
        outcome
    }

    /// Score every registry entry from the last [`analyse`] call.
    ///
    /// [`analyse`]: FraudDetectionEngine::analyse
    pub fn score(&self) -> Vec<ScoreRecord> {
        SuspicionScorer::with_config(&self.table, &self.registry, self.config.scoring.clone())
            .score_all()
    }

    /// Run detection, scoring, and assembly in one pass.
    pub fn analyse_and_report(&mut self) -> AnalysisReport {
        let outcome = self.analyse();
        let records = self.score();
        AnalysisReport::build(&self.table, &records, &outcome)
    }
}

/// Round to two decimals, the precision of all monetary output.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

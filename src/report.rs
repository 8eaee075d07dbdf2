//! Assembles detector and scorer output into the stable JSON shape
//! consumed by external surfaces.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::ScoreRecord;
use crate::{DetectionOutcome, EngineError, TransactionTable};

/// One flagged account as surfaced to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub ring_id: Option<String>,
    pub score: Option<f64>,
    pub skipped: bool,
    pub has_cycle: bool,
    pub has_fan: bool,
    pub has_shell: bool,
    pub has_velocity: bool,
    pub total_txns: usize,
    pub reasons: String,
}

/// One ring in the catalog, pattern-specific fields populated per type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingRecord {
    pub ring_id: String,
    #[serde(rename = "type")]
    pub ring_type: String,
    pub accounts: Vec<String>,
    pub total_amount: Option<f64>,
    pub tx_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hops: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_ceiling: Option<f64>,
}

/// Score statistics over the non-skipped accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
}

/// Run-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analysis_id: String,
    pub analysed_at: String,
    pub total_transactions: usize,
    pub total_accounts: usize,
    pub suspicious_accounts: usize,
    pub skipped_accounts: usize,
    pub fraud_rings_detected: usize,
    pub rings_by_type: BTreeMap<String, usize>,
    pub cycles_detected: usize,
    pub fan_patterns_detected: usize,
    pub shell_chains_detected: usize,
    pub score_distribution: ScoreDistribution,
}

/// Complete analysis result: accounts, ring catalog, summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub suspicious_accounts: Vec<AccountRecord>,
    pub fraud_rings: BTreeMap<String, RingRecord>,
    pub summary: AnalysisSummary,
}

impl AnalysisReport {
    /// Assemble the report from a completed run.
    pub fn build(
        table: &TransactionTable,
        records: &[ScoreRecord],
        outcome: &DetectionOutcome,
    ) -> Self {
        let suspicious_accounts: Vec<AccountRecord> = records
            .iter()
            .map(|r| AccountRecord {
                account_id: r.account_id.clone(),
                ring_id: r.ring_id.clone(),
                score: r.score.and_then(finite),
                skipped: r.skipped,
                has_cycle: r.has_cycle,
                has_fan: r.has_fan,
                has_shell: r.has_shell,
                has_velocity: r.has_velocity,
                total_txns: r.total_txns,
                reasons: r.reasons.clone(),
            })
            .collect();

        let mut fraud_rings: BTreeMap<String, RingRecord> = BTreeMap::new();
        for ring in &outcome.cycles {
            fraud_rings.insert(
                ring.ring_id.clone(),
                RingRecord {
                    ring_id: ring.ring_id.clone(),
                    ring_type: "CYCLE".to_string(),
                    accounts: ring.accounts.clone(),
                    total_amount: finite(ring.total_amount),
                    tx_ids: ring.tx_ids.clone(),
                    cycle_length: Some(ring.cycle_length),
                    counterparty_count: None,
                    window_start: None,
                    window_end: None,
                    hops: None,
                    amount_ceiling: None,
                },
            );
        }
        for ring in &outcome.fans {
            fraud_rings.insert(
                ring.ring_id.clone(),
                RingRecord {
                    ring_id: ring.ring_id.clone(),
                    ring_type: ring.direction.as_str().to_string(),
                    accounts: vec![ring.account_id.clone()],
                    total_amount: finite(ring.total_amount),
                    tx_ids: ring.tx_ids.clone(),
                    cycle_length: None,
                    counterparty_count: Some(ring.counterparty_count),
                    window_start: Some(ring.window_start.to_rfc3339()),
                    window_end: Some(ring.window_end.to_rfc3339()),
                    hops: None,
                    amount_ceiling: None,
                },
            );
        }
        for ring in &outcome.shells {
            fraud_rings.insert(
                ring.ring_id.clone(),
                RingRecord {
                    ring_id: ring.ring_id.clone(),
                    ring_type: "SHELL".to_string(),
                    accounts: ring.accounts.clone(),
                    total_amount: finite(ring.total_amount),
                    tx_ids: ring.tx_ids.clone(),
                    cycle_length: None,
                    counterparty_count: None,
                    window_start: None,
                    window_end: None,
                    hops: Some(ring.hops),
                    amount_ceiling: None,
                },
            );
        }
        for ring in &outcome.structuring {
            fraud_rings.insert(
                ring.ring_id.clone(),
                RingRecord {
                    ring_id: ring.ring_id.clone(),
                    ring_type: "STRUCTURING".to_string(),
                    accounts: vec![ring.account_id.clone()],
                    total_amount: finite(ring.total_amount),
                    tx_ids: ring.tx_ids.clone(),
                    cycle_length: None,
                    counterparty_count: Some(ring.counterparty_count),
                    window_start: Some(ring.window_start.to_rfc3339()),
                    window_end: Some(ring.window_end.to_rfc3339()),
                    hops: None,
                    amount_ceiling: finite(ring.amount_ceiling),
                },
            );
        }

        let mut rings_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for ring in fraud_rings.values() {
            *rings_by_type.entry(ring.ring_type.clone()).or_default() += 1;
        }

        let scored: Vec<f64> = records
            .iter()
            .filter(|r| !r.skipped)
            .filter_map(|r| r.score)
            .filter(|s| s.is_finite())
            .collect();
        let score_distribution = ScoreDistribution {
            max: scored.iter().copied().fold(None, |acc: Option<f64>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            }),
            mean: if scored.is_empty() {
                None
            } else {
                finite(scored.iter().sum::<f64>() / scored.len() as f64)
            },
            min: scored.iter().copied().fold(None, |acc: Option<f64>, s| {
                Some(acc.map_or(s, |a| a.min(s)))
            }),
            high_risk_count: scored.iter().filter(|&&s| s >= 70.0).count(),
            medium_risk_count: scored.iter().filter(|&&s| (40.0..70.0).contains(&s)).count(),
            low_risk_count: scored.iter().filter(|&&s| s < 40.0).count(),
        };

        let summary = AnalysisSummary {
            analysis_id: Uuid::new_v4().to_string(),
            analysed_at: Utc::now().to_rfc3339(),
            total_transactions: table.len(),
            total_accounts: table.accounts().len(),
            suspicious_accounts: suspicious_accounts.len(),
            skipped_accounts: records.iter().filter(|r| r.skipped).count(),
            fraud_rings_detected: fraud_rings.len(),
            rings_by_type,
            cycles_detected: outcome.cycles.len(),
            fan_patterns_detected: outcome.fans.len(),
            shell_chains_detected: outcome.shells.len(),
            score_distribution,
        };

        Self {
            suspicious_accounts,
            fraud_rings,
            summary,
        }
    }

    /// Export as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report to disk as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// NaN and infinity become the absent marker at this boundary.
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

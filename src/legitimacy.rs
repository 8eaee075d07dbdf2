//! Legitimacy heuristics that keep payroll and merchant hubs out of the
//! suspicion registry.

use std::collections::HashMap;

use crate::TransactionTable;

/// Thresholds for the legitimacy rules.
#[derive(Debug, Clone)]
pub struct LegitimacyConfig {
    /// Minimum fraction of repeat counterparties for the payroll and
    /// merchant rules.
    pub repeat_ratio: f64,
    /// Both-sides repeat ratio below which an account looks like a mule
    /// (almost every counterparty is new).
    pub mule_repeat_ratio: f64,
    /// Minimum rows per side before the mule rule applies.
    pub mule_min_rows: usize,
    /// Minimum outgoing payments for the regular-salary rule.
    pub salary_min_payments: usize,
    /// Maximum coefficient of variation of outgoing amounts for the
    /// regular-salary rule.
    pub salary_max_cv: f64,
    /// Outgoing rows must be at least this multiple of incoming rows for
    /// the regular-salary rule.
    pub salary_out_in_ratio: f64,
}

impl Default for LegitimacyConfig {
    fn default() -> Self {
        Self {
            repeat_ratio: 0.4,
            mule_repeat_ratio: 0.1,
            mule_min_rows: 5,
            salary_min_payments: 5,
            salary_max_cv: 0.15,
            salary_out_in_ratio: 3.0,
        }
    }
}

/// Classifies an account as likely legitimate from its raw rows.
///
/// Consulted by the fan and structuring detectors before they mark
/// suspicion; rings are still recorded either way.
#[derive(Debug, Clone, Default)]
pub struct LegitimacyClassifier {
    config: LegitimacyConfig,
}

impl LegitimacyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LegitimacyConfig) -> Self {
        Self { config }
    }

    /// Returns true when the account matches a payroll, merchant, or
    /// regular-salary topology. Deterministic and order-independent;
    /// rules are evaluated in a fixed order and the first match wins.
    pub fn is_likely_legitimate(&self, account_id: &str, table: &TransactionTable) -> bool {
        let mut out_amounts: Vec<f64> = Vec::new();
        let mut in_count = 0usize;
        let mut receivers: HashMap<&str, usize> = HashMap::new();
        let mut senders: HashMap<&str, usize> = HashMap::new();

        for tx in table.rows() {
            if tx.sender_id == account_id {
                out_amounts.push(tx.amount);
                *receivers.entry(tx.receiver_id.as_str()).or_default() += 1;
            }
            if tx.receiver_id == account_id {
                in_count += 1;
                *senders.entry(tx.sender_id.as_str()).or_default() += 1;
            }
        }
        let out_count = out_amounts.len();

        // Rule 1: payroll sender — most receivers are paid more than once.
        if out_count >= 1 && repeat_ratio(&receivers) >= self.config.repeat_ratio {
            return true;
        }

        // Rule 2: merchant receiver — symmetric on the receive side.
        if in_count >= 1 && repeat_ratio(&senders) >= self.config.repeat_ratio {
            return true;
        }

        // Rule 3: regular salary — steady outgoing amounts, mostly outbound.
        if out_count >= self.config.salary_min_payments
            && coefficient_of_variation(&out_amounts) < self.config.salary_max_cv
            && out_count as f64 >= self.config.salary_out_in_ratio * in_count as f64
        {
            return true;
        }

        // Mule signature: enough rows on both sides yet almost every
        // counterparty is new. Explicitly not legitimate.
        if out_count >= self.config.mule_min_rows
            && in_count >= self.config.mule_min_rows
            && repeat_ratio(&receivers) < self.config.mule_repeat_ratio
            && repeat_ratio(&senders) < self.config.mule_repeat_ratio
        {
            return false;
        }

        false
    }
}

/// Fraction of distinct counterparties seen more than once.
fn repeat_ratio(counts: &HashMap<&str, usize>) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let repeated = counts.values().filter(|&&c| c > 1).count();
    repeated as f64 / counts.len() as f64
}

/// Population std over (mean + epsilon); 0.0 for empty input.
fn coefficient_of_variation(amounts: &[f64]) -> f64 {
    if amounts.is_empty() {
        return 0.0;
    }
    let n = amounts.len() as f64;
    let mean = amounts.iter().sum::<f64>() / n;
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / (mean + 1e-9)
}

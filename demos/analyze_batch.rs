//! Fraud ring analysis example
//!
//! Builds a synthetic transaction batch containing a circular flow, a
//! fan-in hub, a payroll sender, a shell chain, and a structuring
//! pattern, then runs the full detection pipeline and prints the
//! assembled report. Pass a CSV path as the first argument to analyze
//! your own batch instead.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fraud_ring_detector::{FraudDetectionEngine, Transaction, TransactionTable};
use uuid::Uuid;

fn tx(from: &str, to: &str, amount: f64, at: DateTime<Utc>) -> Transaction {
    Transaction {
        transaction_id: format!("TXN-{}", Uuid::new_v4()),
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        amount,
        timestamp: at,
    }
}

fn synthetic_batch() -> TransactionTable {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let mut rows = Vec::new();

    // 1. Circular flow: A -> B -> C -> A
    rows.push(tx("ACCT-A", "ACCT-B", 4200.0, base + Duration::hours(1)));
    rows.push(tx("ACCT-B", "ACCT-C", 3800.0, base + Duration::hours(2)));
    rows.push(tx("ACCT-C", "ACCT-A", 3500.0, base + Duration::hours(3)));

    // 2. Fan-in hub: twelve one-off senders inside 48 hours
    for i in 0..12 {
        rows.push(tx(
            &format!("SRC-{i:02}"),
            "HUB-1",
            750.0 + 50.0 * i as f64,
            base + Duration::hours(i * 4),
        ));
    }

    // 3. Payroll sender: repeat receivers keep it off the suspect list
    for week in 0..3 {
        for emp in 0..12 {
            rows.push(tx(
                "PAYROLL-CO",
                &format!("EMP-{emp:02}"),
                2500.0,
                base + Duration::hours(week * 168 + emp),
            ));
        }
    }

    // 4. Shell chain: S1 -> S2 -> S3 -> S4, each account barely used
    rows.push(tx("SHELL-1", "SHELL-2", 900.0, base + Duration::hours(50)));
    rows.push(tx("SHELL-2", "SHELL-3", 850.0, base + Duration::hours(51)));
    rows.push(tx("SHELL-3", "SHELL-4", 800.0, base + Duration::hours(52)));

    // 5. Structuring: six senders just under the $10,000 ceiling
    for i in 0..6 {
        rows.push(tx(
            &format!("DEP-{i}"),
            "COLLECT-1",
            9400.0 + 50.0 * i as f64,
            base + Duration::hours(i * 12),
        ));
    }

    TransactionTable::new(rows)
}

fn main() {
    println!("=== Fraud Ring Detector ===\n");

    let table = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading transactions from {path}");
            match fraud_ring_detector::ingest::read_csv_path(&path) {
                Ok(table) => table,
                Err(err) => {
                    eprintln!("Failed to load {path}: {err}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            println!("No CSV given, using the built-in synthetic batch");
            synthetic_batch()
        }
    };
    println!(
        "Batch: {} transactions, {} accounts, fingerprint {}\n",
        table.len(),
        table.accounts().len(),
        &table.fingerprint()[..16]
    );

    let mut engine = FraudDetectionEngine::new(table);
    let report = engine.analyse_and_report();

    println!("=== Suspicious Accounts ===");
    for account in &report.suspicious_accounts {
        let score = account
            .score
            .map(|s| format!("{s:6.2}"))
            .unwrap_or_else(|| "  SKIP".to_string());
        println!(
            "  {:<12} {:<14} {}  [{}{}{}{}]  {}",
            account.account_id,
            account.ring_id.as_deref().unwrap_or("-"),
            score,
            if account.has_cycle { 'C' } else { '.' },
            if account.has_fan { 'F' } else { '.' },
            if account.has_shell { 'S' } else { '.' },
            if account.has_velocity { 'V' } else { '.' },
            account.reasons
        );
    }

    println!("\n=== Fraud Rings ===");
    for (ring_id, ring) in &report.fraud_rings {
        println!(
            "  {:<14} {:<12} {} account(s), total {}",
            ring_id,
            ring.ring_type,
            ring.accounts.len(),
            ring.total_amount
                .map(|a| format!("${a:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }

    let summary = &report.summary;
    println!("\n=== Summary ===");
    println!("  Analysed at:         {}", summary.analysed_at);
    println!("  Transactions:        {}", summary.total_transactions);
    println!("  Accounts:            {}", summary.total_accounts);
    println!("  Suspicious accounts: {}", summary.suspicious_accounts);
    println!("  Rings detected:      {}", summary.fraud_rings_detected);
    for (ring_type, count) in &summary.rings_by_type {
        println!("    {ring_type:<12} {count}");
    }

    match report.save("results.json") {
        Ok(()) => println!("\nFull report written to results.json"),
        Err(err) => eprintln!("\nCould not write results.json: {err}"),
    }
}

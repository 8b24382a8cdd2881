//! Statistics from the record store
//!
//! Summarizes stored items and the failed-item ledger for the `failures`
//! command.

use crate::output::OutputResult;
use crate::storage::{FailureRecord, SqliteStore};
use std::collections::BTreeMap;

/// Stored-item and failure-ledger summary
#[derive(Debug, Clone)]
pub struct LedgerStatistics {
    /// Items saved so far, for the requested kind or all kinds
    pub saved_items: u64,

    /// Most recent ledger entries, newest first
    pub recent_failures: Vec<FailureRecord>,

    /// Ledger entries among `recent_failures`, per kind
    pub failures_by_kind: BTreeMap<String, u64>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The database to query
/// * `kind` - Restricts the query to one job kind
/// * `limit` - Maximum number of ledger entries to load
pub fn load_statistics(
    store: &SqliteStore,
    kind: Option<&str>,
    limit: usize,
) -> OutputResult<LedgerStatistics> {
    let saved_items = store.count_items(kind)?;
    let recent_failures = store.list_failures(kind, limit)?;

    let mut failures_by_kind = BTreeMap::new();
    for failure in &recent_failures {
        *failures_by_kind.entry(failure.kind.clone()).or_insert(0) += 1;
    }

    Ok(LedgerStatistics {
        saved_items,
        recent_failures,
        failures_by_kind,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("=== Harvest Ledger ===\n");

    println!("Saved items: {}", stats.saved_items);
    println!();

    if stats.recent_failures.is_empty() {
        println!("No failed items recorded.");
        return;
    }

    println!("Failures by kind:");
    for (kind, count) in &stats.failures_by_kind {
        println!("  {}: {}", kind, count);
    }
    println!();

    println!("Recent failures ({}):", stats.recent_failures.len());
    for failure in &stats.recent_failures {
        println!(
            "  {} [{}] {} (attempts: {}) - {}",
            failure.failed_at.format("%Y-%m-%d %H:%M:%S"),
            failure.kind,
            failure.url,
            failure.attempts,
            failure.reason
        );
    }
}

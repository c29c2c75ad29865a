// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports metrics through the `metrics` facade for:
//! - Replication rounds per doctype (count, duration, changed documents)
//! - Replication errors by kind
//! - Loop lifecycle (running gauge, fatal task failures, immediate tasks)
//! - Per-doctype sync status
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `pouchlink_`:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations in seconds
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a finished replication round.
pub fn record_replication_round(doctype: &str, direction: &str, changed: usize, duration: Duration) {
    counter!(
        "pouchlink_replication_rounds_total",
        "doctype" => doctype.to_string(),
        "direction" => direction.to_string()
    )
    .increment(1);
    counter!("pouchlink_replicated_docs_total", "doctype" => doctype.to_string())
        .increment(changed as u64);
    histogram!("pouchlink_replication_duration_seconds", "doctype" => doctype.to_string())
        .record(duration.as_secs_f64());
}

/// Record a reported (transient) replication failure.
pub fn record_replication_error(doctype: &str, error_kind: &str) {
    counter!(
        "pouchlink_replication_errors_total",
        "doctype" => doctype.to_string(),
        "error_type" => error_kind.to_string()
    )
    .increment(1);
}

/// Record a remote database that was absent during the existence probe.
pub fn record_missing_remote_database(doctype: &str) {
    counter!("pouchlink_missing_remote_databases_total", "doctype" => doctype.to_string())
        .increment(1);
}

/// Gauge: 1 while a loop is running.
pub fn set_loop_running(loop_name: &str, running: bool) {
    gauge!("pouchlink_loop_running", "loop" => loop_name.to_string())
        .set(if running { 1.0 } else { 0.0 });
}

/// Record a task failure that stopped a loop.
pub fn record_task_failure(loop_name: &str, reason: &str) {
    counter!(
        "pouchlink_loop_task_failures_total",
        "loop" => loop_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record an immediate task accepted by a running loop.
pub fn record_immediate_task(loop_name: &str) {
    counter!("pouchlink_loop_immediate_tasks_total", "loop" => loop_name.to_string()).increment(1);
}

/// Record an immediate task dropped because the loop was stopped.
pub fn record_immediate_task_dropped(loop_name: &str) {
    counter!("pouchlink_loop_immediate_tasks_dropped_total", "loop" => loop_name.to_string())
        .increment(1);
}

/// Gauge for a doctype's sync status.
pub fn set_sync_status(doctype: &str, status: &str) {
    // Encoded for alerting (0=uninitialized .. 5=destroyed)
    let value = match status {
        "Uninitialized" => 0.0,
        "DatabaseEnsured" => 1.0,
        "Idle" => 2.0,
        "Replicating" => 3.0,
        "Stopped" => 4.0,
        "Destroyed" => 5.0,
        _ => -1.0,
    };
    gauge!("pouchlink_sync_status", "doctype" => doctype.to_string()).set(value);
}

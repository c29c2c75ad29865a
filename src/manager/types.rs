// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-doctype state and replication results.
//!
//! # State Transitions
//!
//! ```text
//!                 ensure_databases_exist()
//! Uninitialized ─────────────────────────→ DatabaseEnsured
//!                                                │
//!                                                │ start_replication_loop()
//!                                                ↓
//!                       round done  ┌──────→   Idle  ←──────┐
//!                    (ok / transient)│           │           │ start_replication_loop()
//!                                   │           │ round      │
//!                                   └──── Replicating        │
//!                                               │            │
//!                    stop_replication_loop()    ↓            │
//!                    or fatal task error ──→ Stopped ────────┘
//!                                               │
//!                         destroy_database()    ↓
//!                                           Destroyed
//! ```
//!
//! `Destroyed` is terminal and only reached through explicit teardown.

use crate::config::ReplicationStrategy;
use crate::error::LinkError;
use serde_json::Value;
use std::time::Duration;

/// Sync status of one doctype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Manager built, remote not probed yet.
    Uninitialized,

    /// Remote existence probe done (present, or absent and created lazily).
    DatabaseEnsured,

    /// Loop running, no round in flight.
    Idle,

    /// A replication round is in flight.
    Replicating,

    /// Loop stopped (explicitly, or by a fatal task error).
    Stopped,

    /// Local store destroyed. Terminal.
    Destroyed,
}

impl SyncStatus {
    /// Whether a new round may start from this state.
    pub fn can_replicate(&self) -> bool {
        !matches!(self, SyncStatus::Destroyed)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Uninitialized => write!(f, "Uninitialized"),
            SyncStatus::DatabaseEnsured => write!(f, "DatabaseEnsured"),
            SyncStatus::Idle => write!(f, "Idle"),
            SyncStatus::Replicating => write!(f, "Replicating"),
            SyncStatus::Stopped => write!(f, "Stopped"),
            SyncStatus::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Outcome of one replication round.
#[derive(Debug, Clone)]
pub struct ReplicationResult {
    pub doctype: String,
    pub strategy: ReplicationStrategy,
    /// Ids of documents transferred in either direction.
    pub changed_ids: Vec<String>,
    /// Documents pulled into the local store, as the store returned them.
    pub docs: Vec<Value>,
    pub elapsed: Duration,
    /// Transient failure that ended the round early.
    pub error: Option<LinkError>,
}

impl ReplicationResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receiver of replication outcomes.
///
/// The manager holds this instead of a reference to the client, so the
/// ownership graph stays acyclic.
pub trait SyncSink: Send + Sync + 'static {
    /// Documents pulled by a successful round (possibly empty).
    fn on_sync(&self, doctype: &str, docs: Vec<Value>);

    /// A transient replication failure. The loop keeps running.
    fn on_error(&self, _doctype: &str, _error: &LinkError) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl SyncSink for NoOpSink {
    fn on_sync(&self, _doctype: &str, _docs: Vec<Value>) {}
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local embedded store integration traits.
//!
//! Defines what the replication layer needs from the per-doctype embedded
//! document store. The store owns the actual replication protocol (changes
//! feed, revision diffs, checkpoints, transport timeouts); this crate only
//! schedules it and consumes the resulting change batches.
//!
//! # Example
//!
//! ```rust,no_run
//! use pouch_link::store::{
//!     BulkDocResult, ChangeBatch, LocalStore, ReplicationRequest, StoreFuture, StoreInfo, StoreResult,
//! };
//! use futures::stream::{self, BoxStream, StreamExt};
//! use serde_json::Value;
//!
//! struct MyStore { /* ... */ }
//!
//! impl LocalStore for MyStore {
//!     fn replicate(&self, _request: ReplicationRequest) -> BoxStream<'_, StoreResult<ChangeBatch>> {
//!         stream::empty().boxed()
//!     }
//!
//!     fn info(&self) -> StoreFuture<'_, StoreInfo> {
//!         Box::pin(async { Ok(StoreInfo::default()) })
//!     }
//!
//!     fn destroy(&self) -> StoreFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!
//!     fn bulk_docs(&self, docs: Vec<Value>) -> StoreFuture<'_, Vec<BulkDocResult>> {
//!         Box::pin(async move { Ok(Vec::new()) })
//!     }
//!
//!     fn get(&self, _id: &str) -> StoreFuture<'_, Option<Value>> {
//!         Box::pin(async { Ok(None) })
//!     }
//!
//!     fn all_docs(&self) -> StoreFuture<'_, Vec<Value>> {
//!         Box::pin(async { Ok(Vec::new()) })
//!     }
//! }
//! ```

use crate::config::ReplicationStrategy;
use crate::error::StoreError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed store futures (reduces trait signature complexity).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Parameters for one replication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Which directions to replicate.
    pub strategy: ReplicationStrategy,
    /// Remote endpoint for this doctype.
    pub remote_url: String,
    /// Documents per changes batch.
    pub batch_size: usize,
}

/// Direction of a change batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    /// Remote documents written to the local store.
    Pull,
    /// Local documents written to the remote.
    Push,
}

/// Documents transferred in one step of a replication.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub direction: ChangeDirection,
    pub docs: Vec<Value>,
}

impl ChangeBatch {
    pub fn pull(docs: Vec<Value>) -> Self {
        Self {
            direction: ChangeDirection::Pull,
            docs,
        }
    }

    pub fn push(docs: Vec<Value>) -> Self {
        Self {
            direction: ChangeDirection::Push,
            docs,
        }
    }
}

/// Summary of a local database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub doc_count: u64,
    pub update_seq: u64,
}

/// Outcome of writing one document with [`LocalStore::bulk_docs`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocResult {
    pub id: String,
    pub rev: Option<String>,
    pub error: Option<StoreError>,
}

impl BulkDocResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Trait defining what we need from a local per-doctype store.
///
/// Handles for different doctypes are independent and may be opened
/// concurrently. `destroy()` is only called on an idle store: the manager
/// stops and drains the doctype's loop first.
pub trait LocalStore: Send + Sync + 'static {
    /// Replicate with the remote, yielding change batches as they land.
    ///
    /// The stream ends when the replication completes. An `Err` item ends
    /// the round with that failure.
    fn replicate(&self, request: ReplicationRequest) -> BoxStream<'_, StoreResult<ChangeBatch>>;

    /// Document count and update sequence.
    fn info(&self) -> StoreFuture<'_, StoreInfo>;

    /// Delete the local database.
    fn destroy(&self) -> StoreFuture<'_, ()>;

    /// Write several documents at once.
    fn bulk_docs(&self, docs: Vec<Value>) -> StoreFuture<'_, Vec<BulkDocResult>>;

    /// Fetch one document by `_id`.
    fn get(&self, id: &str) -> StoreFuture<'_, Option<Value>>;

    /// Every document, design documents included.
    fn all_docs(&self) -> StoreFuture<'_, Vec<Value>>;
}

/// Opens local stores by database name.
pub trait StoreAdapter: Send + Sync + 'static {
    type Store: LocalStore;

    fn open(&self, name: &str) -> StoreResult<Self::Store>;
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication manager.
//!
//! Owns one local store and one [`Loop`] per configured doctype and drives
//! replication between them and the remote:
//! - Probes the remote databases once ([`PouchManager::ensure_databases_exist`])
//! - Runs periodic rounds on each doctype's loop
//! - Serves on-demand rounds ([`PouchManager::sync_immediately`])
//! - Tears down local stores on logout
//!
//! # Architecture
//!
//! ```text
//!                        PouchManager
//!        ┌──────────────────┼──────────────────┐
//!        ▼                  ▼                  ▼
//!   io.cozy.files     io.cozy.contacts        ...
//!   ┌──────────┐       ┌──────────┐
//!   │ Loop     │       │ Loop     │   one worker each
//!   │ Doctype  │       │ Doctype  │   store + status + replication lock
//!   └────┬─────┘       └────┬─────┘
//!        └────── SyncSink ◄─┘          pulled docs / transient errors
//! ```
//!
//! The doctype map is fixed at construction. Rounds of the same doctype
//! never overlap, whether they come from the loop or from
//! [`PouchManager::replicate_once`]; different doctypes run in parallel.

mod types;

pub use types::{NoOpSink, ReplicationResult, SyncSink, SyncStatus};

use crate::config::{LinkConfig, ReplicationStrategy};
use crate::error::{LinkError, Result, StoreError};
use crate::metrics;
use crate::normalize::{self, DocFilter};
use crate::store::{ChangeDirection, LocalStore, ReplicationRequest, StoreAdapter};
use crate::task_loop::{Loop, LoopConfig, Task, TaskFuture};
use crate::transport::{data_path, Method, Transport};
use futures::future::{join_all, try_join_all};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{debug, error, info, instrument, warn};

/// Everything a replication round of one doctype touches.
///
/// Shared between the manager and the doctype's [`ReplicateTask`].
struct Doctype<S: LocalStore> {
    name: String,
    store: Arc<S>,
    remote_url: String,
    strategy: ReplicationStrategy,
    batch_size: usize,
    filter: RwLock<DocFilter>,
    sink: Arc<dyn SyncSink>,
    status: watch::Sender<SyncStatus>,
    /// At least one round completed without error.
    synced: AtomicBool,
    /// Set while the loop is stopped, so a finishing round settles on `Stopped`.
    halted: AtomicBool,
    /// Serializes rounds of this doctype.
    replication: Mutex<()>,
    /// Cached remote probe.
    ensured: OnceCell<()>,
}

impl<S: LocalStore> Doctype<S> {
    fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
        metrics::set_sync_status(&self.name, &status.to_string());
    }

    fn filter(&self) -> DocFilter {
        Arc::clone(&self.filter.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Status after a round that began in `prior`.
    fn settle(&self, prior: SyncStatus) {
        let next = match (self.halted.load(Ordering::Acquire), prior) {
            (false, _) => SyncStatus::Idle,
            (true, SyncStatus::Idle | SyncStatus::Replicating) => SyncStatus::Stopped,
            (true, prior) => prior,
        };
        self.set_status(next);
    }

    /// Run one round. Transient store failures land on the result.
    #[instrument(skip_all, fields(doctype = %self.name))]
    async fn replicate(&self) -> Result<ReplicationResult> {
        let _round = self.replication.lock().await;

        let prior = self.status();
        if !prior.can_replicate() {
            return Err(LinkError::InvalidState {
                expected: "a replicable doctype".to_string(),
                actual: prior.to_string(),
            });
        }

        self.set_status(SyncStatus::Replicating);
        debug!(strategy = %self.strategy, "Replication round starting");

        let started = Instant::now();
        let request = ReplicationRequest {
            strategy: self.strategy,
            remote_url: self.remote_url.clone(),
            batch_size: self.batch_size,
        };
        let outcome = self.collect_changes(request).await;
        let elapsed = started.elapsed();

        let (changed_ids, docs, failure) = match outcome {
            Ok((changed_ids, docs)) => (changed_ids, docs, None),
            Err((e, changed_ids, docs)) => (changed_ids, docs, Some(e)),
        };

        let mut result = ReplicationResult {
            doctype: self.name.clone(),
            strategy: self.strategy,
            changed_ids,
            docs,
            elapsed,
            error: None,
        };

        match failure {
            None => {
                self.synced.store(true, Ordering::Release);
                self.settle(prior);
                metrics::record_replication_round(
                    &self.name,
                    &self.strategy.to_string(),
                    result.changed_ids.len(),
                    elapsed,
                );
                info!(
                    changed = result.changed_ids.len(),
                    pulled = result.docs.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Replication round complete"
                );
                self.sink.on_sync(&self.name, result.docs.clone());
                Ok(result)
            }
            Some(e) if e.is_transient() => {
                self.settle(prior);
                metrics::record_replication_error(&self.name, e.kind());
                warn!(error = %e, changed = result.changed_ids.len(), "Replication round failed, will retry");
                // Pulled before the failure and past the store's checkpoint
                if !result.docs.is_empty() {
                    self.sink.on_sync(&self.name, result.docs.clone());
                }
                let err = LinkError::store(&self.name, e);
                self.sink.on_error(&self.name, &err);
                result.error = Some(err);
                Ok(result)
            }
            Some(e) => {
                self.set_status(SyncStatus::Stopped);
                metrics::record_replication_error(&self.name, e.kind());
                error!(error = %e, "Replication round failed");
                Err(LinkError::store(&self.name, e))
            }
        }
    }

    /// Consume the store's change stream.
    ///
    /// On failure, whatever was transferred before it is returned alongside.
    #[allow(clippy::type_complexity)]
    async fn collect_changes(
        &self,
        request: ReplicationRequest,
    ) -> std::result::Result<(Vec<String>, Vec<Value>), (StoreError, Vec<String>, Vec<Value>)> {
        let filter = self.filter();
        let mut seen = HashSet::new();
        let mut changed_ids = Vec::new();
        let mut pulled = Vec::new();

        let mut stream = self.store.replicate(request);
        while let Some(batch) = stream.next().await {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => return Err((e, changed_ids, pulled)),
            };
            for doc in batch.docs {
                if !normalize::is_user_document(&doc) || !filter(&doc) {
                    continue;
                }
                if let Some(id) = normalize::document_id(&doc) {
                    if seen.insert(id.to_string()) {
                        changed_ids.push(id.to_string());
                    }
                }
                if batch.direction == ChangeDirection::Pull {
                    pulled.push(doc);
                }
            }
        }

        Ok((changed_ids, pulled))
    }
}

/// Periodic task of a doctype's loop.
struct ReplicateTask<S: LocalStore> {
    doctype: Arc<Doctype<S>>,
}

impl<S: LocalStore> Task for ReplicateTask<S> {
    fn execute(&self) -> TaskFuture<'_> {
        Box::pin(async move { self.doctype.replicate().await.map(|_| ()) })
    }

    fn name(&self) -> &str {
        "replicate"
    }
}

struct Entry<S: LocalStore> {
    doctype: Arc<Doctype<S>>,
    replication_loop: Loop,
}

/// Replication manager for a fixed set of doctypes.
pub struct PouchManager<S: LocalStore> {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    entries: BTreeMap<String, Entry<S>>,
}

impl<S: LocalStore> PouchManager<S> {
    /// Open one local store and build one loop per configured doctype.
    ///
    /// Nothing runs until [`start_replication_loop`](Self::start_replication_loop).
    pub fn new<A>(config: LinkConfig, adapter: &A, transport: Arc<dyn Transport>, sink: Arc<dyn SyncSink>) -> Result<Self>
    where
        A: StoreAdapter<Store = S>,
    {
        config.validate()?;

        let mut entries = BTreeMap::new();
        for name in &config.doctypes {
            let database = config.database_name(name);
            let store = adapter
                .open(&database)
                .map_err(|e| LinkError::store(name, e))?;
            debug!(doctype = %name, database = %database, "Opened local store");

            let (status, _) = watch::channel(SyncStatus::Uninitialized);
            let doctype = Arc::new(Doctype {
                name: name.clone(),
                store: Arc::new(store),
                remote_url: config.remote_url_for(name),
                strategy: config.strategy_for(name),
                batch_size: config.replication.batch_size,
                filter: RwLock::new(normalize::default_filter()),
                sink: Arc::clone(&sink),
                status,
                synced: AtomicBool::new(false),
                halted: AtomicBool::new(true),
                replication: Mutex::new(()),
                ensured: OnceCell::new(),
            });

            let replication_loop = Loop::new(
                name.clone(),
                Arc::new(ReplicateTask {
                    doctype: Arc::clone(&doctype),
                }),
                LoopConfig {
                    delay: config.interval_for(name),
                    run_on_start: config.replication.run_on_start,
                },
            );

            entries.insert(
                name.clone(),
                Entry {
                    doctype,
                    replication_loop,
                },
            );
        }

        info!(doctypes = entries.len(), "Replication manager created");

        Ok(Self {
            config,
            transport,
            entries,
        })
    }

    /// Replace the predicate deciding which replicated documents surface.
    ///
    /// Design documents and tombstones are excluded whatever the filter says.
    pub fn with_filter(self, filter: DocFilter) -> Self {
        for entry in self.entries.values() {
            *entry
                .doctype
                .filter
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&filter);
        }
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Managed doctypes, in sorted order.
    pub fn doctypes(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn manages(&self, doctype: &str) -> bool {
        self.entries.contains_key(doctype)
    }

    fn entry(&self, doctype: &str) -> Result<&Entry<S>> {
        self.entries
            .get(doctype)
            .ok_or_else(|| LinkError::UnknownDoctype(doctype.to_string()))
    }

    /// Local store of a doctype.
    pub fn store(&self, doctype: &str) -> Result<Arc<S>> {
        Ok(Arc::clone(&self.entry(doctype)?.doctype.store))
    }

    pub fn sync_status(&self, doctype: &str) -> Result<SyncStatus> {
        Ok(self.entry(doctype)?.doctype.status())
    }

    /// Watch a doctype's status changes.
    pub fn status_receiver(&self, doctype: &str) -> Result<watch::Receiver<SyncStatus>> {
        Ok(self.entry(doctype)?.doctype.status.subscribe())
    }

    /// True once a round of this doctype completed without error.
    pub fn is_synced(&self, doctype: &str) -> bool {
        self.entries
            .get(doctype)
            .is_some_and(|e| e.doctype.synced.load(Ordering::Acquire))
    }

    /// True while any doctype's loop is running.
    pub fn is_replicating(&self) -> bool {
        self.entries.values().any(|e| e.replication_loop.is_running())
    }

    /// Fatal error that stopped a doctype's loop, if any.
    pub fn replication_error(&self, doctype: &str) -> Option<LinkError> {
        self.entries
            .get(doctype)
            .and_then(|e| e.replication_loop.last_error())
    }

    /// Probe every remote database once.
    ///
    /// A missing remote database is not an error: the store creates it on
    /// first push. Other transport failures propagate and are retried on
    /// the next call.
    pub async fn ensure_databases_exist(&self) -> Result<()> {
        try_join_all(self.entries.values().map(|entry| self.ensure_database(&entry.doctype))).await?;
        Ok(())
    }

    async fn ensure_database(&self, doctype: &Doctype<S>) -> Result<()> {
        doctype
            .ensured
            .get_or_try_init(|| async {
                let path = data_path(&doctype.name, "_all_docs?limit=1");
                match self.transport.fetch(Method::Get, &path, None).await {
                    Ok(_) => {
                        debug!(doctype = %doctype.name, "Remote database exists");
                    }
                    Err(e) if e.is_not_found() => {
                        metrics::record_missing_remote_database(&doctype.name);
                        info!(doctype = %doctype.name, "Remote database missing, it will be created on first replication");
                    }
                    Err(e) => {
                        warn!(doctype = %doctype.name, error = %e, "Remote database probe failed");
                        return Err(LinkError::Transport(e));
                    }
                }
                if doctype.status() == SyncStatus::Uninitialized {
                    doctype.set_status(SyncStatus::DatabaseEnsured);
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Ensure the remote databases, then start every doctype's loop.
    ///
    /// Loops already running are left alone. Destroyed doctypes stay down.
    pub async fn start_replication_loop(&self) -> Result<()> {
        self.ensure_databases_exist().await?;

        for entry in self.entries.values() {
            let doctype = &entry.doctype;
            if doctype.status() == SyncStatus::Destroyed {
                warn!(doctype = %doctype.name, "Not starting replication of a destroyed doctype");
                continue;
            }
            doctype.halted.store(false, Ordering::Release);
            // A round in flight settles the status itself
            if doctype.replication.try_lock().is_ok() {
                doctype.set_status(SyncStatus::Idle);
            }
            entry.replication_loop.start();
        }

        info!(doctypes = self.entries.len(), "Replication loops started");
        Ok(())
    }

    /// Stop every loop. Rounds in flight finish on their own.
    pub fn stop_replication_loop(&self) {
        for entry in self.entries.values() {
            let doctype = &entry.doctype;
            doctype.halted.store(true, Ordering::Release);
            entry.replication_loop.stop();
            let settled = !matches!(doctype.status(), SyncStatus::Destroyed | SyncStatus::Uninitialized);
            if settled && doctype.replication.try_lock().is_ok() {
                doctype.set_status(SyncStatus::Stopped);
            }
        }
        debug!("Replication loops stopped");
    }

    /// Wait for every loop's in-flight round.
    ///
    /// Returns the first fatal loop error, after all loops have settled.
    pub async fn wait_for_current_replications(&self) -> Result<()> {
        let results = join_all(
            self.entries
                .values()
                .map(|entry| entry.replication_loop.wait_for_current_task()),
        )
        .await;
        results.into_iter().collect()
    }

    /// Run one replication round of `doctype` now, outside its loop.
    ///
    /// Waits for any round of the same doctype already in flight.
    pub async fn replicate_once(&self, doctype: &str) -> Result<ReplicationResult> {
        self.entry(doctype)?.doctype.replicate().await
    }

    /// Run a round on the loop of `doctype` (every doctype when `None`) and
    /// wait for it.
    ///
    /// A round already in flight finishes first. Doctypes whose loop is not
    /// running are skipped with a warning.
    pub async fn sync_immediately(&self, doctype: Option<&str>) -> Result<()> {
        let targets: Vec<&Entry<S>> = match doctype {
            Some(name) => vec![self.entry(name)?],
            None => self.entries.values().collect(),
        };

        let handles: Vec<_> = targets
            .into_iter()
            .map(|entry| (entry.doctype.name.as_str(), entry.replication_loop.schedule_immediate()))
            .collect();

        let mut first_error = None;
        for (name, handle) in handles {
            if !handle.is_scheduled() {
                warn!(doctype = %name, "Replication loop not running, cannot sync immediately");
                continue;
            }
            if let Err(e) = handle.wait().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the doctype's loop, wait for its round, then delete the local store.
    pub async fn destroy_database(&self, doctype: &str) -> Result<()> {
        let entry = self.entry(doctype)?;
        let state = &entry.doctype;

        state.halted.store(true, Ordering::Release);
        entry.replication_loop.stop();
        if let Err(e) = entry.replication_loop.wait_for_current_task().await {
            warn!(doctype = %doctype, error = %e, "Loop had failed before destroy");
        }

        // Manual rounds are not covered by the loop's gate
        let _round = state.replication.lock().await;
        if state.status() == SyncStatus::Destroyed {
            return Ok(());
        }

        state
            .store
            .destroy()
            .await
            .map_err(|e| LinkError::store(doctype, e))?;
        state.synced.store(false, Ordering::Release);
        state.set_status(SyncStatus::Destroyed);
        info!(doctype = %doctype, "Local database destroyed");
        Ok(())
    }

    /// Destroy every doctype's local store.
    ///
    /// Every doctype is attempted; the first failure is returned.
    pub async fn destroy_all(&self) -> Result<()> {
        let mut first_error = None;
        for name in self.entries.keys() {
            if let Err(e) = self.destroy_database(name).await {
                warn!(doctype = %name, error = %e, "Failed to destroy local database");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: LocalStore> std::fmt::Debug for PouchManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PouchManager")
            .field("doctypes", &self.entries.keys().collect::<Vec<_>>())
            .field("replicating", &self.is_replicating())
            .finish()
    }
}

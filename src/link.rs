// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client-facing link.
//!
//! [`PouchLink`] is what the data client talks to. It owns the
//! [`PouchManager`] for the logged-in session and:
//! - Feeds replicated documents back into the client's cache
//! - Serves reads locally once a doctype is synced, remotely before that
//! - Writes mutations of managed doctypes to the local store
//! - Publishes lifecycle events on a broadcast channel
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► on_login() ──► start_replication() ◄──► stop_replication()
//!               │                                         │
//!               └─────────────── on_logout() ◄────────────┘
//!                        (stop, wait, destroy local stores)
//! ```
//!
//! The manager never holds a reference to the link: replication outcomes
//! travel through a [`SyncSink`] over the link's hooks only.

use crate::config::LinkConfig;
use crate::error::{LinkError, Result, TransportError, TransportErrorKind};
use crate::manager::{PouchManager, SyncSink};
use crate::normalize::{self, DocFilter};
use crate::store::{LocalStore, StoreAdapter};
use crate::transport::{data_path, doc_path, Method, Transport};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The data client's cache, refreshed after every replication round.
pub trait ClientCache: Send + Sync + 'static {
    /// Replace or merge the cached documents of `doctype`.
    fn set_data(&self, doctype: &str, docs: Vec<Value>);
}

/// Callback for normalized documents pulled by a round.
pub type OnSync = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// Callback for transient replication failures.
pub type OnError = Arc<dyn Fn(&str, &LinkError) + Send + Sync>;

/// Lifecycle events published by [`PouchLink`].
#[derive(Debug, Clone)]
pub enum LinkEvent {
    ReplicationStarted,
    ReplicationStopped,
    /// A round of `doctype` completed; `count` normalized documents were pulled.
    Synced { doctype: String, count: usize },
    /// A round of `doctype` failed transiently.
    SyncFailed { doctype: String, error: LinkError },
}

/// State shared with the manager through [`SyncSink`].
struct Hooks {
    client: RwLock<Option<Arc<dyn ClientCache>>>,
    on_sync: RwLock<Option<OnSync>>,
    on_error: RwLock<Option<OnError>>,
    filter: RwLock<DocFilter>,
    events: broadcast::Sender<LinkEvent>,
}

impl Hooks {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: RwLock::new(None),
            on_sync: RwLock::new(None),
            on_error: RwLock::new(None),
            filter: RwLock::new(normalize::default_filter()),
            events,
        }
    }

    fn filter(&self) -> DocFilter {
        Arc::clone(&self.filter.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Filter then normalize `docs` for the client.
    fn surface(&self, docs: Vec<Value>, doctype: &str) -> Vec<Value> {
        normalize::normalize_docs(docs, doctype, &self.filter())
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handle_on_sync(&self, doctype: &str, docs: Vec<Value>) {
        let docs = self.surface(docs, doctype);
        let count = docs.len();

        let client = self.client.read().unwrap_or_else(PoisonError::into_inner).clone();
        let on_sync = self.on_sync.read().unwrap_or_else(PoisonError::into_inner).clone();

        match (client, on_sync) {
            (Some(client), Some(on_sync)) => {
                client.set_data(doctype, docs.clone());
                on_sync(doctype, &docs);
            }
            (Some(client), None) => client.set_data(doctype, docs),
            (None, Some(on_sync)) => on_sync(doctype, &docs),
            (None, None) => debug!(doctype = %doctype, count, "No client registered, dropping synced documents"),
        }

        self.emit(LinkEvent::Synced {
            doctype: doctype.to_string(),
            count,
        });
    }

    fn handle_on_error(&self, doctype: &str, error: &LinkError) {
        let on_error = self.on_error.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(on_error) = on_error {
            on_error(doctype, error);
        }
        self.emit(LinkEvent::SyncFailed {
            doctype: doctype.to_string(),
            error: error.clone(),
        });
    }
}

impl SyncSink for Hooks {
    fn on_sync(&self, doctype: &str, docs: Vec<Value>) {
        self.handle_on_sync(doctype, docs);
    }

    fn on_error(&self, doctype: &str, error: &LinkError) {
        self.handle_on_error(doctype, error);
    }
}

/// Offline-first link between a data client and the remote.
pub struct PouchLink<A: StoreAdapter> {
    config: LinkConfig,
    adapter: A,
    transport: Arc<dyn Transport>,
    hooks: Arc<Hooks>,
    manager: tokio::sync::RwLock<Option<Arc<PouchManager<A::Store>>>>,
    replication_started: AtomicBool,
}

impl<A: StoreAdapter> PouchLink<A> {
    pub fn new(config: LinkConfig, adapter: A, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            adapter,
            transport,
            hooks: Arc::new(Hooks::new()),
            manager: tokio::sync::RwLock::new(None),
            replication_started: AtomicBool::new(false),
        }
    }

    /// Called with the normalized documents of every successful round,
    /// right after the client cache received them.
    pub fn with_on_sync(self, on_sync: impl Fn(&str, &[Value]) + Send + Sync + 'static) -> Self {
        let on_sync: OnSync = Arc::new(on_sync);
        *self.hooks.on_sync.write().unwrap_or_else(PoisonError::into_inner) = Some(on_sync);
        self
    }

    /// Called on every transient replication failure.
    pub fn with_on_error(self, on_error: impl Fn(&str, &LinkError) + Send + Sync + 'static) -> Self {
        let on_error: OnError = Arc::new(on_error);
        *self.hooks.on_error.write().unwrap_or_else(PoisonError::into_inner) = Some(on_error);
        self
    }

    /// Document filter applied to replicated documents and to reads.
    ///
    /// Handed to the manager on login.
    pub fn with_filter(self, filter: DocFilter) -> Self {
        *self.hooks.filter.write().unwrap_or_else(PoisonError::into_inner) = filter;
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Attach the client whose cache receives replicated documents.
    pub fn register_client(&self, client: Arc<dyn ClientCache>) {
        *self.hooks.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    /// Lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.hooks.events.subscribe()
    }

    /// Manager of the current session.
    pub async fn manager(&self) -> Option<Arc<PouchManager<A::Store>>> {
        self.manager.read().await.clone()
    }

    async fn require_manager(&self) -> Result<Arc<PouchManager<A::Store>>> {
        self.manager().await.ok_or(LinkError::NotLoggedIn)
    }

    pub async fn is_logged_in(&self) -> bool {
        self.manager.read().await.is_some()
    }

    pub fn is_replication_started(&self) -> bool {
        self.replication_started.load(Ordering::Acquire)
    }

    /// Create the session's manager and probe the remote databases.
    ///
    /// Starts replication right away when `initial_sync` is configured.
    pub async fn on_login(&self) -> Result<()> {
        {
            let mut slot = self.manager.write().await;
            if slot.is_some() {
                warn!("Already logged in, ignoring login");
                return Ok(());
            }

            let sink: Arc<dyn SyncSink> = self.hooks.clone();
            let manager = PouchManager::new(self.config.clone(), &self.adapter, Arc::clone(&self.transport), sink)?
                .with_filter(self.hooks.filter());
            manager.ensure_databases_exist().await?;
            *slot = Some(Arc::new(manager));
        }

        info!(doctypes = self.config.doctypes.len(), "Logged in");

        if self.config.replication.initial_sync {
            self.start_replication().await?;
        }
        Ok(())
    }

    /// Stop replication and delete every local store of the session.
    ///
    /// If a store cannot be destroyed the session is kept, so that logout
    /// can be retried.
    pub async fn on_logout(&self) -> Result<()> {
        let Some(manager) = self.manager.write().await.take() else {
            debug!("Not logged in, nothing to reset");
            return Ok(());
        };

        manager.stop_replication_loop();
        if self.replication_started.swap(false, Ordering::AcqRel) {
            self.hooks.emit(LinkEvent::ReplicationStopped);
        }
        if let Err(e) = manager.wait_for_current_replications().await {
            warn!(error = %e, "Replication had failed before logout");
        }
        if let Err(e) = manager.destroy_all().await {
            warn!(error = %e, "Logout incomplete, local databases remain");
            let mut slot = self.manager.write().await;
            if slot.is_none() {
                *slot = Some(manager);
            }
            return Err(e);
        }

        info!("Logged out, local databases destroyed");
        Ok(())
    }

    /// Start every doctype's loop.
    ///
    /// Emits [`LinkEvent::ReplicationStarted`] on the first start and
    /// whenever loops stopped by a failed round are brought back.
    pub async fn start_replication(&self) -> Result<()> {
        let manager = self.require_manager().await?;
        let recovering = manager
            .doctypes()
            .iter()
            .any(|doctype| manager.replication_error(doctype).is_some());
        manager.start_replication_loop().await?;
        let first_start = !self.replication_started.swap(true, Ordering::AcqRel);
        if first_start || recovering {
            self.hooks.emit(LinkEvent::ReplicationStarted);
        }
        Ok(())
    }

    /// No-op before login or before replication was started.
    pub async fn stop_replication(&self) {
        let Some(manager) = self.manager().await else {
            debug!("Not logged in, no replication to stop");
            return;
        };
        if !self.replication_started.swap(false, Ordering::AcqRel) {
            debug!("Replication not started");
            return;
        }
        manager.stop_replication_loop();
        self.hooks.emit(LinkEvent::ReplicationStopped);
    }

    /// Replicate `doctype` (every doctype when `None`) now and wait for it.
    pub async fn sync_immediately(&self, doctype: Option<&str>) -> Result<()> {
        self.require_manager().await?.sync_immediately(doctype).await
    }

    /// Normalize `docs` and push them into the client cache.
    pub fn handle_on_sync(&self, doctype: &str, docs: Vec<Value>) {
        self.hooks.handle_on_sync(doctype, docs);
    }

    /// Manager, if `doctype` is managed and has completed a round.
    async fn synced_manager(&self, doctype: &str) -> Option<Arc<PouchManager<A::Store>>> {
        self.manager()
            .await
            .filter(|m| m.manages(doctype) && m.is_synced(doctype))
    }

    /// Fetch one document, locally once synced.
    pub async fn get(&self, doctype: &str, id: &str) -> Result<Option<Value>> {
        if let Some(manager) = self.synced_manager(doctype).await {
            let doc = manager
                .store(doctype)?
                .get(id)
                .await
                .map_err(|e| LinkError::store(doctype, e))?;
            return Ok(doc.and_then(|doc| self.hooks.surface(vec![doc], doctype).pop()));
        }

        match self.transport.fetch(Method::Get, &doc_path(doctype, id), None).await {
            Ok(doc) => Ok(self.hooks.surface(vec![doc], doctype).pop()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every document of a doctype, locally once synced.
    pub async fn all(&self, doctype: &str) -> Result<Vec<Value>> {
        if let Some(manager) = self.synced_manager(doctype).await {
            let docs = manager
                .store(doctype)?
                .all_docs()
                .await
                .map_err(|e| LinkError::store(doctype, e))?;
            return Ok(self.hooks.surface(docs, doctype));
        }

        let path = data_path(doctype, "_all_docs?include_docs=true");
        let response = match self.transport.fetch(Method::Get, &path, None).await {
            Ok(response) => response,
            // Remote database not created yet
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let rows = response
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| TransportError::new(TransportErrorKind::InvalidResponse, &path, "missing rows"))?;
        let docs = rows.iter().filter_map(|row| row.get("doc").cloned()).collect();
        Ok(self.hooks.surface(docs, doctype))
    }

    /// Write a new document to the local store.
    pub async fn create(&self, doctype: &str, doc: Value) -> Result<Value> {
        self.write(doctype, normalize::sanitize_doc(doc)).await
    }

    /// Write a new revision of an existing document.
    pub async fn update(&self, doctype: &str, doc: Value) -> Result<Value> {
        let doc = normalize::sanitize_doc(doc);
        if normalize::document_id(&doc).is_none() {
            return Err(LinkError::InvalidDocument("update needs an _id".to_string()));
        }
        self.write(doctype, doc).await
    }

    /// Delete a document. Needs its `_id` and current `_rev`.
    pub async fn destroy(&self, doctype: &str, doc: Value) -> Result<Value> {
        let doc = normalize::sanitize_doc(doc);
        let (Some(id), Some(rev)) = (normalize::document_id(&doc), doc.get("_rev").and_then(Value::as_str)) else {
            return Err(LinkError::InvalidDocument("destroy needs an _id and a _rev".to_string()));
        };
        let tombstone = json!({"_id": id, "_rev": rev, "_deleted": true});

        let written = self.write_raw(doctype, tombstone).await?;
        let mut deleted = doc;
        if let (Some(map), Some(rev)) = (deleted.as_object_mut(), written.get("_rev").cloned()) {
            map.insert("_rev".to_string(), rev);
        }
        normalize::normalize_doc(deleted, doctype)
            .ok_or_else(|| LinkError::InvalidDocument("destroyed document has no id".to_string()))
    }

    async fn write(&self, doctype: &str, doc: Value) -> Result<Value> {
        let written = self.write_raw(doctype, doc).await?;
        normalize::normalize_doc(written, doctype)
            .ok_or_else(|| LinkError::InvalidDocument("written document has no id".to_string()))
    }

    /// Write one document through `bulk_docs` and return it with the
    /// store-assigned id and revision.
    async fn write_raw(&self, doctype: &str, doc: Value) -> Result<Value> {
        let manager = self.require_manager().await?;
        if !manager.manages(doctype) {
            return Err(LinkError::UnknownDoctype(doctype.to_string()));
        }
        if !doc.is_object() {
            return Err(LinkError::InvalidDocument("document must be an object".to_string()));
        }

        let store = manager.store(doctype)?;
        let results = store
            .bulk_docs(vec![doc.clone()])
            .await
            .map_err(|e| LinkError::store(doctype, e))?;
        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Internal("bulk_docs returned no result".to_string()))?;
        if let Some(e) = result.error {
            return Err(LinkError::store(doctype, e));
        }

        let mut written = doc;
        if let Some(map) = written.as_object_mut() {
            map.insert("_id".to_string(), Value::String(result.id));
            if let Some(rev) = result.rev {
                map.insert("_rev".to_string(), Value::String(rev));
            }
        }
        debug!(doctype = %doctype, "Document written locally");
        Ok(written)
    }
}

impl<A: StoreAdapter> std::fmt::Debug for PouchLink<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PouchLink")
            .field("doctypes", &self.config.doctypes)
            .field("replication_started", &self.is_replication_started())
            .finish()
    }
}

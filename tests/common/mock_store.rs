//! Mock LocalStore / StoreAdapter for testing.
//!
//! Records every replicate() call and tracks how many rounds run at once.
//! Rounds can be scripted, slowed down, failed or made to panic. Writes go
//! to an in-memory document map and are pushed on the next round.

use futures::stream::{self, BoxStream, StreamExt};
use pouch_link::store::{
    BulkDocResult, ChangeBatch, LocalStore, ReplicationRequest, StoreAdapter, StoreFuture, StoreInfo,
    StoreResult,
};
use pouch_link::StoreError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    name: String,
    /// Local documents by id (tombstones kept with `_deleted`).
    docs: Mutex<BTreeMap<String, Value>>,
    /// Ids written locally since the last round.
    pending_push: Mutex<Vec<String>>,
    /// Scripted batches, one entry per round.
    script: Mutex<VecDeque<Vec<StoreResult<ChangeBatch>>>>,
    /// Error returned by every round while set.
    failing: Mutex<Option<StoreError>>,
    /// Error returned by destroy() while set.
    failing_destroy: Mutex<Option<StoreError>>,
    requests: Mutex<Vec<ReplicationRequest>>,
    round_delay: Mutex<Option<Duration>>,
    panic_next_round: AtomicBool,
    started: AtomicUsize,
    completed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    destroyed: AtomicBool,
    destroyed_while_active: AtomicBool,
    next_id: AtomicUsize,
}

/// In-memory store. Clones share state.
///
/// # Example
/// ```rust,ignore
/// let store = MockStore::new("test_io.cozy.files");
/// store.push_round(vec![Ok(ChangeBatch::pull(vec![json!({"_id": "a"})]))]);
///
/// // Use in tests...
///
/// assert_eq!(store.completed_rounds(), 1);
/// assert_eq!(store.max_concurrent_rounds(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Inner>,
}

impl MockStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                ..Inner::default()
            }),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Queue the batches of one future round.
    pub fn push_round(&self, batches: Vec<StoreResult<ChangeBatch>>) {
        self.inner.script.lock().unwrap().push_back(batches);
    }

    /// Make every round fail with `error` until cleared.
    pub fn set_failing(&self, error: Option<StoreError>) {
        *self.inner.failing.lock().unwrap() = error;
    }

    /// Make destroy() fail with `error` until cleared.
    pub fn set_failing_destroy(&self, error: Option<StoreError>) {
        *self.inner.failing_destroy.lock().unwrap() = error;
    }

    /// Keep each round in flight for `delay`.
    pub fn set_round_delay(&self, delay: Duration) {
        *self.inner.round_delay.lock().unwrap() = Some(delay);
    }

    pub fn panic_next_round(&self) {
        self.inner.panic_next_round.store(true, Ordering::SeqCst);
    }

    /// Put a document in the local map without scheduling a push.
    pub fn seed(&self, doc: Value) {
        let id = doc["_id"].as_str().unwrap_or_default().to_string();
        self.inner.docs.lock().unwrap().insert(id, doc);
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn started_rounds(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn completed_rounds(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Highest number of rounds ever in flight at once.
    pub fn max_concurrent_rounds(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ReplicationRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn destroyed_while_active(&self) -> bool {
        self.inner.destroyed_while_active.load(Ordering::SeqCst)
    }

    /// Raw stored document.
    pub fn raw(&self, id: &str) -> Option<Value> {
        self.inner.docs.lock().unwrap().get(id).cloned()
    }

    pub fn doc_count(&self) -> usize {
        self.inner.docs.lock().unwrap().len()
    }

    /// Run one round: record, hold for the configured delay, then yield
    /// pending pushes followed by the scripted batches.
    async fn round(&self, request: ReplicationRequest) -> Vec<StoreResult<ChangeBatch>> {
        let inner = &self.inner;
        inner.requests.lock().unwrap().push(request);
        inner.started.fetch_add(1, Ordering::SeqCst);
        let now_active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *inner.round_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        inner.active.fetch_sub(1, Ordering::SeqCst);
        inner.completed.fetch_add(1, Ordering::SeqCst);

        if inner.panic_next_round.swap(false, Ordering::SeqCst) {
            panic!("mock store {} blew up mid-round", inner.name);
        }

        if let Some(error) = inner.failing.lock().unwrap().clone() {
            return vec![Err(error)];
        }

        let mut batches = Vec::new();

        let pushed: Vec<Value> = {
            let ids = std::mem::take(&mut *inner.pending_push.lock().unwrap());
            let docs = inner.docs.lock().unwrap();
            ids.iter().filter_map(|id| docs.get(id).cloned()).collect()
        };
        if !pushed.is_empty() {
            batches.push(Ok(ChangeBatch::push(pushed)));
        }

        let scripted = inner.script.lock().unwrap().pop_front().unwrap_or_default();
        for batch in scripted {
            if let Ok(ref b) = batch {
                if b.direction == pouch_link::store::ChangeDirection::Pull {
                    let mut docs = inner.docs.lock().unwrap();
                    for doc in &b.docs {
                        if let Some(id) = doc["_id"].as_str() {
                            docs.insert(id.to_string(), doc.clone());
                        }
                    }
                }
            }
            batches.push(batch);
        }

        batches
    }
}

impl LocalStore for MockStore {
    fn replicate(&self, request: ReplicationRequest) -> BoxStream<'_, StoreResult<ChangeBatch>> {
        stream::once(self.round(request))
            .flat_map(stream::iter)
            .boxed()
    }

    fn info(&self) -> StoreFuture<'_, StoreInfo> {
        Box::pin(async move {
            Ok(StoreInfo {
                doc_count: self.doc_count() as u64,
                update_seq: self.inner.next_id.load(Ordering::SeqCst) as u64,
            })
        })
    }

    fn destroy(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if let Some(error) = self.inner.failing_destroy.lock().unwrap().clone() {
                return Err(error);
            }
            if self.inner.active.load(Ordering::SeqCst) > 0 {
                self.inner.destroyed_while_active.store(true, Ordering::SeqCst);
            }
            self.inner.docs.lock().unwrap().clear();
            self.inner.destroyed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn bulk_docs(&self, docs: Vec<Value>) -> StoreFuture<'_, Vec<BulkDocResult>> {
        Box::pin(async move {
            let mut stored = self.inner.docs.lock().unwrap();
            let mut pending = self.inner.pending_push.lock().unwrap();
            let mut results = Vec::with_capacity(docs.len());

            for mut doc in docs {
                let id = match doc["_id"].as_str() {
                    Some(id) => id.to_string(),
                    None => format!("mock-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst)),
                };
                let current_rev = stored.get(&id).and_then(|d| d["_rev"].as_str().map(str::to_string));
                let given_rev = doc["_rev"].as_str().map(str::to_string);

                if current_rev.is_some() && current_rev != given_rev {
                    results.push(BulkDocResult {
                        id: id.clone(),
                        rev: None,
                        error: Some(StoreError::Conflict(id)),
                    });
                    continue;
                }

                let generation = current_rev
                    .as_deref()
                    .and_then(|r| r.split('-').next())
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or(0)
                    + 1;
                let rev = format!("{}-mock", generation);

                if let Some(map) = doc.as_object_mut() {
                    map.insert("_id".to_string(), Value::String(id.clone()));
                    map.insert("_rev".to_string(), Value::String(rev.clone()));
                }
                stored.insert(id.clone(), doc);
                pending.push(id.clone());
                results.push(BulkDocResult {
                    id,
                    rev: Some(rev),
                    error: None,
                });
            }

            Ok(results)
        })
    }

    fn get(&self, id: &str) -> StoreFuture<'_, Option<Value>> {
        let doc = self.raw(id);
        Box::pin(async move { Ok(doc) })
    }

    fn all_docs(&self) -> StoreFuture<'_, Vec<Value>> {
        Box::pin(async move { Ok(self.inner.docs.lock().unwrap().values().cloned().collect()) })
    }
}

/// Adapter handing out [`MockStore`]s and remembering them by name.
#[derive(Clone, Default)]
pub struct MockAdapter {
    stores: Arc<Mutex<HashMap<String, MockStore>>>,
    round_delay: Option<Duration>,
    fail_open: Arc<AtomicBool>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every opened store holds each round for `delay`.
    pub fn with_round_delay(mut self, delay: Duration) -> Self {
        self.round_delay = Some(delay);
        self
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Store opened under `name`, if any.
    pub fn store(&self, name: &str) -> Option<MockStore> {
        self.stores.lock().unwrap().get(name).cloned()
    }

    pub fn opened(&self) -> Vec<String> {
        let mut names: Vec<_> = self.stores.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl StoreAdapter for MockAdapter {
    type Store = MockStore;

    fn open(&self, name: &str) -> StoreResult<MockStore> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupted(name.to_string()));
        }
        let mut stores = self.stores.lock().unwrap();
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| MockStore::new(name))
            .clone();
        if let Some(delay) = self.round_delay {
            store.set_round_delay(delay);
        }
        Ok(store)
    }
}

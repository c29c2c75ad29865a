//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - Mock LocalStore / StoreAdapter recording replication rounds
//! - Mock Transport and recording ClientCache
//! - Polling helpers for paused-clock tests

#![allow(dead_code)]

pub mod mock_remote;
pub mod mock_store;

pub use mock_remote::*;
pub use mock_store::*;

use pouch_link::{LinkConfig, NoOpSink, PouchManager};
use std::sync::Arc;
use std::time::Duration;

pub const FILES: &str = "io.cozy.files";
pub const CONTACTS: &str = "io.cozy.contacts";

/// Local database name of a doctype under [`LinkConfig::for_testing`].
pub fn db_name(doctype: &str) -> String {
    format!("test_{}", doctype)
}

/// Install a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 10ms (virtual time under a paused clock) until it
/// holds, failing after 10s.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

/// Manager over mock collaborators with a no-op sink.
pub fn test_manager(
    config: LinkConfig,
    adapter: &MockAdapter,
    transport: Arc<MockTransport>,
) -> PouchManager<MockStore> {
    PouchManager::new(config, adapter, transport, Arc::new(NoOpSink)).expect("manager")
}

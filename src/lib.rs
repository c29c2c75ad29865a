//! # Pouch Link
//!
//! An offline-first replication layer that mirrors remote document
//! collections ("doctypes") into local embedded stores.
//!
//! ## Architecture
//!
//! The link sits between a data client and the remote document API,
//! keeping one local store per doctype in sync on a schedule:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                               pouch-link                                  │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ PouchLink   │───►│ PouchManager │───►│ Loop (per doctype)           │  │
//! │  │ (client API)│    │ (doctypes)   │    │ periodic + immediate rounds  │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! │         ▲                   │                          │                  │
//! │         │ SyncSink          ▼                          ▼                  │
//! │  ┌─────────────┐    ┌──────────────┐          ┌─────────────────┐         │
//! │  │ ClientCache │    │ Transport    │          │ LocalStore      │         │
//! │  │ (set_data)  │    │ (remote API) │          │ (replicate)     │         │
//! │  └─────────────┘    └──────────────┘          └─────────────────┘         │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The HTTP client and the embedded store are supplied by the host through
//! the [`Transport`] and [`StoreAdapter`] traits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pouch_link::{LinkConfig, PouchLink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LinkConfig::for_testing(&["io.cozy.files"]);
//!     let link = PouchLink::new(config, MyAdapter::default(), Arc::new(MyTransport::new()));
//!     link.register_client(Arc::new(MyCache::default()));
//!
//!     link.on_login().await.expect("Failed to log in");
//!     link.start_replication().await.expect("Failed to start");
//!     link.sync_immediately(Some("io.cozy.files")).await.expect("Sync failed");
//!
//!     link.on_logout().await.expect("Failed to reset");
//! }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod manager;
pub mod metrics;
pub mod normalize;
pub mod store;
pub mod task_loop;
pub mod transport;

// Re-exports for convenience
pub use config::{DoctypeReplication, LinkConfig, ReplicationSettings, ReplicationStrategy};
pub use error::{LinkError, Result, StoreError, TransportError, TransportErrorKind};
pub use link::{ClientCache, LinkEvent, PouchLink};
pub use manager::{NoOpSink, PouchManager, ReplicationResult, SyncSink, SyncStatus};
pub use normalize::DocFilter;
pub use store::{ChangeBatch, LocalStore, StoreAdapter};
pub use task_loop::{task_fn, Completion, Loop, LoopConfig, Task, TaskHandle};
pub use transport::{Method, Transport};

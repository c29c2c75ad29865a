// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication layer.
//!
//! Errors are split by the collaborator they come from. The local store and
//! the transport report structured kinds so that callers branch on the kind,
//! never on the error text.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store` | Depends | Local store or replication stream failure |
//! | `Transport` | Depends | Remote API call failed |
//! | `UnknownDoctype` | No | Doctype not configured on this manager |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle violation (e.g. replicating a destroyed store) |
//! | `TaskPanicked` | No | A loop task panicked |
//! | `InvalidDocument` | No | Document lacks an id or revision |
//! | `NotLoggedIn` | No | Link used before `on_login()` |
//! | `Internal` | No | Unexpected internal error |
//!
//! `LinkError` is `Clone`: a loop that dies on a task failure hands the same
//! error to every caller waiting on it.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failure kinds reported by a [`LocalStore`](crate::store::LocalStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The remote or local database does not exist.
    #[error("database not found: {0}")]
    NotFound(String),

    /// The remote answered but is temporarily unable to serve.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// Connection dropped, timed out or could not be established.
    #[error("network error: {0}")]
    Network(String),

    /// A write lost against a concurrent revision.
    #[error("document update conflict: {0}")]
    Conflict(String),

    /// Local data is unreadable.
    #[error("local store corrupted: {0}")]
    Corrupted(String),

    /// Anything else the store could not classify.
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the next scheduled round may succeed without intervention.
    ///
    /// Transient failures are recorded on the replication result and the
    /// loop keeps running. Everything else stops the loop.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Unavailable(_) | Self::Network(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Network(_) => "network",
            Self::Conflict(_) => "conflict",
            Self::Corrupted(_) => "corrupted",
            Self::Internal(_) => "internal",
        }
    }
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 404: the database or document is absent.
    NotFound,
    /// 401/403: credentials missing or expired.
    Unauthorized,
    /// No response at all.
    Network,
    /// 5xx or any other unexpected status.
    Server,
    /// A response body that is not the JSON we expected.
    InvalidResponse,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Network => write!(f, "network"),
            Self::Server => write!(f, "server"),
            Self::InvalidResponse => write!(f, "invalid_response"),
        }
    }
}

/// Error returned by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} ({path}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub path: String,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, path, "not_found")
    }

    /// Check the kind, not the message.
    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }
}

/// Errors surfaced by the manager, the loops and the link.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Local store or replication stream failure.
    #[error("Store error ({doctype}): {source}")]
    Store {
        doctype: String,
        #[source]
        source: StoreError,
    },

    /// Remote API call failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The doctype was not configured on this manager.
    #[error("Unknown doctype: {0}")]
    UnknownDoctype(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A loop task panicked.
    #[error("Task panicked in loop {loop_name}: {message}")]
    TaskPanicked { loop_name: String, message: String },

    /// A document lacks what the operation needs (id, revision).
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The link has no manager yet.
    #[error("Not logged in")]
    NotLoggedIn,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// Wrap a store error with the doctype it happened on.
    pub fn store(doctype: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            doctype: doctype.into(),
            source,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_transient(),
            Self::Transport(e) => matches!(
                e.kind,
                TransportErrorKind::Network | TransportErrorKind::Server
            ),
            Self::UnknownDoctype(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::TaskPanicked { .. } => false,
            Self::InvalidDocument(_) => false,
            Self::NotLoggedIn => false,
            Self::Internal(_) => false,
        }
    }
}

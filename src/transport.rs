// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote API transport.
//!
//! The HTTP client and its authentication live outside this crate. We only
//! need a way to send a JSON request and to learn, by kind, why it failed.

use crate::error::TransportError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Transport::fetch`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;

/// HTTP method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Head => write!(f, "HEAD"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Authenticated access to the remote document API.
///
/// Implementations map HTTP statuses onto
/// [`TransportErrorKind`](crate::error::TransportErrorKind); a 404 must come
/// back as `NotFound` whatever the body says.
pub trait Transport: Send + Sync + 'static {
    fn fetch(&self, method: Method, path: &str, body: Option<Value>) -> TransportFuture<'_>;
}

/// Path of a doctype's data endpoint, e.g. `/data/io.cozy.files/_all_docs`.
pub fn data_path(doctype: &str, suffix: &str) -> String {
    let doctype = urlencoding::encode(doctype);
    if suffix.is_empty() {
        format!("/data/{}/", doctype)
    } else {
        format!("/data/{}/{}", doctype, suffix)
    }
}

/// Path of a single document.
pub fn doc_path(doctype: &str, id: &str) -> String {
    data_path(doctype, &urlencoding::encode(id))
}

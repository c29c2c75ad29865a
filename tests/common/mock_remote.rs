//! Mock Transport and ClientCache for testing.
//!
//! The transport records every call and answers from a path table, falling
//! back to an empty `_all_docs` listing. The cache records every
//! `set_data()` call.

use pouch_link::transport::{Method, Transport, TransportFuture};
use pouch_link::{ClientCache, TransportError, TransportErrorKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// A recorded fetch() call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<FetchCall>>,
    /// Responses by exact path.
    responses: Mutex<HashMap<String, Result<Value, TransportErrorKind>>>,
    /// Error for every path starting with the prefix.
    prefix_errors: Mutex<Vec<(String, TransportErrorKind)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_response(&self, path: &str, value: Value) {
        self.responses.lock().unwrap().insert(path.to_string(), Ok(value));
    }

    pub fn set_error(&self, path: &str, kind: TransportErrorKind) {
        self.responses.lock().unwrap().insert(path.to_string(), Err(kind));
    }

    /// Fail every path under `prefix` with `kind`.
    pub fn fail_prefix(&self, prefix: &str, kind: TransportErrorKind) {
        self.prefix_errors.lock().unwrap().push((prefix.to_string(), kind));
    }

    pub fn clear_errors(&self) {
        self.prefix_errors.lock().unwrap().clear();
        self.responses.lock().unwrap().retain(|_, r| r.is_ok());
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose path starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path.starts_with(prefix))
            .count()
    }

    fn respond(&self, path: &str) -> Result<Value, TransportError> {
        let prefix_error = self
            .prefix_errors
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, kind)| *kind);
        if let Some(kind) = prefix_error {
            return Err(TransportError::new(kind, path, "mock failure"));
        }

        match self.responses.lock().unwrap().get(path) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(kind)) => Err(TransportError::new(*kind, path, "mock failure")),
            None if path.contains("_all_docs") => Ok(json!({"total_rows": 0, "rows": []})),
            None => Err(TransportError::not_found(path)),
        }
    }
}

impl Transport for MockTransport {
    fn fetch(&self, method: Method, path: &str, body: Option<Value>) -> TransportFuture<'_> {
        self.calls.lock().unwrap().push(FetchCall {
            method,
            path: path.to_string(),
            body,
        });
        let response = self.respond(path);
        Box::pin(async move { response })
    }
}

/// Records every set_data() call.
#[derive(Default)]
pub struct RecordingCache {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Every document handed over for `doctype`, in order.
    pub fn docs_for(&self, doctype: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == doctype)
            .flat_map(|(_, docs)| docs.clone())
            .collect()
    }
}

impl ClientCache for RecordingCache {
    fn set_data(&self, doctype: &str, docs: Vec<Value>) {
        self.calls.lock().unwrap().push((doctype.to_string(), docs));
    }
}

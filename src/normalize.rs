// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document normalization between the local store and the client.
//!
//! Documents leaving the local store get the canonical identity shape the
//! client expects:
//!
//! ```text
//! { "_id": "abc", "_rev": "2-x", "_revisions": {..}, "name": "a.txt" }
//!                        │ normalize_doc(_, "io.cozy.files")
//!                        ▼
//! { "_id": "abc", "id": "abc", "_type": "io.cozy.files", "_rev": "2-x", "name": "a.txt" }
//! ```
//!
//! Design documents and tombstones never leave this module. Documents going
//! into the store are sanitized: `_type` is client-side only and the store
//! rejects unknown underscore fields.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Id prefix of the store's indexing documents.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// Store bookkeeping fields stripped from surfaced documents.
const INTERNAL_FIELDS: &[&str] = &["_deleted", "_revisions", "_local_seq", "_conflicts"];

/// Predicate deciding whether a replicated document is surfaced.
pub type DocFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Filter used unless the manager is given another one.
pub fn default_filter() -> DocFilter {
    Arc::new(is_user_document)
}

fn doc_id(map: &Map<String, Value>) -> Option<&str> {
    map.get("_id")
        .and_then(Value::as_str)
        .or_else(|| map.get("id").and_then(Value::as_str))
}

/// `_id` of a document, falling back to `id`.
pub fn document_id(doc: &Value) -> Option<&str> {
    doc.as_object().and_then(doc_id)
}

pub fn is_design_document(doc: &Value) -> bool {
    doc.as_object()
        .and_then(doc_id)
        .is_some_and(|id| id.starts_with(DESIGN_DOC_PREFIX))
}

pub fn is_deleted_document(doc: &Value) -> bool {
    doc.get("_deleted").and_then(Value::as_bool).unwrap_or(false)
}

/// Neither a design document nor a tombstone.
pub fn is_user_document(doc: &Value) -> bool {
    !is_design_document(doc) && !is_deleted_document(doc)
}

/// Rewrite a store document into the client's shape.
///
/// Returns `None` for non-objects and documents without any id.
pub fn normalize_doc(doc: Value, doctype: &str) -> Option<Value> {
    let Value::Object(mut map) = doc else {
        return None;
    };
    let id = doc_id(&map)?.to_string();

    for field in INTERNAL_FIELDS {
        map.remove(*field);
    }
    map.insert("_id".to_string(), Value::String(id.clone()));
    map.insert("id".to_string(), Value::String(id));
    map.insert("_type".to_string(), Value::String(doctype.to_string()));

    Some(Value::Object(map))
}

/// Filter then normalize a batch. Design documents and tombstones are
/// always dropped, whatever `filter` says.
pub fn normalize_docs(docs: Vec<Value>, doctype: &str, filter: &DocFilter) -> Vec<Value> {
    docs.into_iter()
        .filter(|doc| is_user_document(doc) && filter(doc))
        .filter_map(|doc| normalize_doc(doc, doctype))
        .collect()
}

/// Prepare a client document for the local store.
///
/// Drops `_type` and fills `_id` from `id` when only the latter is set.
pub fn sanitize_doc(doc: Value) -> Value {
    let Value::Object(mut map) = doc else {
        return doc;
    };
    map.remove("_type");
    if !map.contains_key("_id") {
        if let Some(id) = map.get("id").cloned() {
            map.insert("_id".to_string(), id);
        }
    }
    Value::Object(map)
}

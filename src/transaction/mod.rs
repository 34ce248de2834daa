//! Transaction data model and per-request context (C3).
//!
//! A [`Transaction`] is the central entity persisted and observed by extensions; a
//! [`TransactionContext`] is the live, pipeline-carried handle around one, adding the
//! control flags ("dropped", "skip") that the pipeline and extension manager consult.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod message;
use message::{HttpMessage, MessageHandle, SharedMessage};

/// Metadata reserved key names (`spec.md` §3).
pub mod reserved_keys {
    pub const INTERCEPTED: &str = "intercepted";
    pub const HAS_NOTE: &str = "has_note";
    pub const ORIGINAL_HOST_HEADER: &str = "original_host_header";
    pub const OVERRIDE_HOST_HEADER: &str = "override_host_header";
    pub const PRETTIFIED_REQUEST: &str = "prettified-request";
    pub const PRETTIFIED_RESPONSE: &str = "prettified-response";
    pub const REQUEST_BUILDER: &str = "request_builder";
    pub const MARASI_EXTENSION_ID: &str = "marasi_extension_id";
}

/// 128-bit, time-ordered transaction identifier (UUIDv7): lexical sort equals
/// arrival order, satisfying the id-ordering invariant in `spec.md` §5/§8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TransactionId(Uuid::parse_str(s)?))
    }
}

/// Free-form string-keyed JSON-like metadata carried on every transaction.
///
/// Invariant: keys are UTF-8 strings; values are `null | bool | number | string |
/// list | map of same` (enforced by `serde_json::Value` itself).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Metadata(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn is_intercepted(&self) -> bool {
        self.get(reserved_keys::INTERCEPTED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_intercepted(&mut self, value: bool) {
        self.set(reserved_keys::INTERCEPTED, Value::Bool(value));
    }

    /// `note = ""` removes `has_note`; `note != ""` sets it (spec.md §8 invariant 7).
    pub fn apply_note_flag(&mut self, note: &str) {
        if note.is_empty() {
            self.remove(reserved_keys::HAS_NOTE);
        } else {
            self.set(reserved_keys::HAS_NOTE, Value::Bool(true));
        }
    }

    /// `set_host` records `original_host_header` only the first time it is called on
    /// this transaction, and updates `override_host_header` on every call — the
    /// decided semantics for the open question in `spec.md` §9.
    pub fn record_host_override(&mut self, original: &str, new_host: &str) {
        if !self.contains_key(reserved_keys::ORIGINAL_HOST_HEADER) {
            self.set(
                reserved_keys::ORIGINAL_HOST_HEADER,
                Value::String(original.to_string()),
            );
        }
        self.set(
            reserved_keys::OVERRIDE_HOST_HEADER,
            Value::String(new_host.to_string()),
        );
    }

    /// `set_metadata({k=v})` assigns to `metadata[extension_name] = {k=v}` without
    /// disturbing any other extension's slot (spec.md §8 invariant 8).
    pub fn set_extension_slot(&mut self, extension_name: &str, fields: Map<String, Value>) {
        let slot = self
            .0
            .entry(extension_name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(existing) = slot {
            for (k, v) in fields {
                existing.insert(k, v);
            }
        } else {
            *slot = Value::Object(fields);
        }
    }

    pub fn get_extension_slot(&self, extension_name: &str) -> Option<&Map<String, Value>> {
        self.get(extension_name).and_then(Value::as_object)
    }
}

/// The central, persisted entity (spec.md §3).
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub scheme: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub raw_request: Bytes,
    pub raw_response: Option<Bytes>,
    pub status_text: String,
    pub status_code: i32,
    pub content_type: String,
    pub content_length: i64,
    pub metadata: Metadata,
    pub request_timestamp: DateTime<Utc>,
    pub response_timestamp: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new transaction, matching the Connect Handler's "frozen before
    /// forward" request-side fields (spec.md §3/§4.4): new id, empty metadata,
    /// millisecond-truncated UTC clock.
    pub fn new(scheme: &str, method: &str, host: &str, path: &str, raw_request: Bytes) -> Self {
        let now = Utc::now();
        let truncated = now
            .with_nanosecond((now.timestamp_subsec_millis()) * 1_000_000)
            .unwrap_or(now);
        Transaction {
            id: TransactionId::new(),
            scheme: scheme.to_string(),
            method: method.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            raw_request,
            raw_response: None,
            status_text: "N/A".to_string(),
            status_code: -1,
            content_type: String::new(),
            content_length: 0,
            metadata: Metadata::new(),
            request_timestamp: truncated,
            response_timestamp: None,
        }
    }

    pub fn mark_response(&mut self, raw_response: Bytes, status_code: i32, status_text: String) {
        self.raw_response = Some(raw_response);
        self.status_code = status_code;
        self.status_text = status_text;
        self.response_timestamp = Some(Utc::now());
    }
}

use chrono::Timelike;

/// Live, pipeline-carried handle to one transaction.
///
/// Carries the identifier, the mutable metadata map, the drop flag, and the
/// per-phase skip flag, propagated inline with the request/response object so
/// script mutations through the bridge are observed by the pipeline directly
/// (spec.md §4.3, §9 "explicit carry" redesign note).
#[derive(Clone)]
pub struct TransactionContext {
    transaction: Arc<Mutex<Transaction>>,
    dropped: Arc<AtomicBool>,
    skip: Arc<AtomicBool>,
    request_message: SharedMessage,
    response_message: Arc<Mutex<Option<HttpMessage>>>,
}

impl TransactionContext {
    pub fn new(transaction: Transaction, request_message: HttpMessage) -> Self {
        TransactionContext {
            transaction: Arc::new(Mutex::new(transaction)),
            dropped: Arc::new(AtomicBool::new(false)),
            skip: Arc::new(AtomicBool::new(false)),
            request_message: message::shared(request_message),
            response_message: Arc::new(Mutex::new(None)),
        }
    }

    pub fn request_message(&self) -> SharedMessage {
        self.request_message.clone()
    }

    /// Installed once the response head has been read (`ReadResponseHead`, spec.md
    /// §4.5), before the response-phase extensions run.
    pub fn install_response_message(&self, response: HttpMessage) {
        *self.response_message.lock() = Some(response);
    }

    /// Shared handle to the (optional) response message; `None` until
    /// `install_response_message` has run. Bridge `Response` facades hold this same
    /// `Arc<Mutex<..>>`, so mutations through the bridge are visible to the pipeline.
    pub fn response_slot(&self) -> Arc<Mutex<Option<HttpMessage>>> {
        self.response_message.clone()
    }

    pub fn has_response(&self) -> bool {
        self.response_message.lock().is_some()
    }

    pub fn take_response_snapshot(&self) -> Option<HttpMessage> {
        self.response_message.lock().clone()
    }

    pub fn request_handle(&self) -> MessageHandle {
        MessageHandle::Request(self.request_message.clone())
    }

    pub fn response_handle(&self) -> MessageHandle {
        MessageHandle::Response(self.response_message.clone())
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.lock().id
    }

    pub fn with_transaction<R>(&self, f: impl FnOnce(&Transaction) -> R) -> R {
        f(&self.transaction.lock())
    }

    pub fn with_transaction_mut<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> R {
        f(&mut self.transaction.lock())
    }

    pub fn snapshot(&self) -> Transaction {
        self.transaction.lock().clone()
    }

    pub fn drop_flag(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn set_dropped(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    /// Reset at the start of each extension's turn within a phase (spec.md §4.7).
    pub fn reset_skip(&self) {
        self.skip.store(false, Ordering::SeqCst);
    }

    pub fn skip_flag(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    pub fn set_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_v7_lexical_order_matches_temporal_order() {
        let a = TransactionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TransactionId::new();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn note_flag_round_trip() {
        let mut meta = Metadata::new();
        meta.apply_note_flag("hello");
        assert_eq!(meta.get(reserved_keys::HAS_NOTE), Some(&Value::Bool(true)));
        meta.apply_note_flag("");
        assert!(meta.get(reserved_keys::HAS_NOTE).is_none());
    }

    #[test]
    fn host_override_pins_original_on_first_call_only() {
        let mut meta = Metadata::new();
        meta.record_host_override("old.example", "new1.example");
        meta.record_host_override("old.example", "new2.example");
        assert_eq!(
            meta.get(reserved_keys::ORIGINAL_HOST_HEADER),
            Some(&Value::String("old.example".to_string()))
        );
        assert_eq!(
            meta.get(reserved_keys::OVERRIDE_HOST_HEADER),
            Some(&Value::String("new2.example".to_string()))
        );
    }

    #[test]
    fn set_metadata_does_not_overwrite_peer_extension_slots() {
        let mut meta = Metadata::new();
        let mut fields_a = Map::new();
        fields_a.insert("k".to_string(), Value::String("v1".to_string()));
        meta.set_extension_slot("ext-a", fields_a);

        let mut fields_b = Map::new();
        fields_b.insert("k".to_string(), Value::String("v2".to_string()));
        meta.set_extension_slot("ext-b", fields_b);

        assert_eq!(
            meta.get_extension_slot("ext-a").unwrap().get("k"),
            Some(&Value::String("v1".to_string()))
        );
        assert_eq!(
            meta.get_extension_slot("ext-b").unwrap().get("k"),
            Some(&Value::String("v2".to_string()))
        );
    }

    #[test]
    fn skip_flag_resets_independently_of_drop_flag() {
        let ctx = TransactionContext::new(
            Transaction::new("https", "GET", "h", "/", Bytes::new()),
            HttpMessage::new_request("GET", "https://h/", "HTTP/1.1", ""),
        );
        ctx.set_skip();
        assert!(ctx.skip_flag());
        ctx.reset_skip();
        assert!(!ctx.skip_flag());
        ctx.set_dropped();
        assert!(ctx.drop_flag());
    }
}

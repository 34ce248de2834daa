//! `marasi.repo` (spec.md §4.8) — traffic queries exposed to scripts, backed by
//! the persistence collaborator.

use std::sync::Arc;
use std::str::FromStr;

use rhai::{Dynamic, Map};

use crate::persistence::Persistence;
use crate::scripting::convert::{dynamic_to_json, json_to_dynamic};
use crate::transaction::TransactionId;

#[derive(Clone)]
pub struct RepoNamespace {
    persistence: Arc<dyn Persistence>,
}

impl RepoNamespace {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        RepoNamespace { persistence }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    }

    pub fn get_summary(&mut self) -> Vec<Dynamic> {
        match self.block_on(self.persistence.get_summary()) {
            Ok(rows) => rows
                .into_iter()
                .map(|row| {
                    let mut map = Map::new();
                    map.insert("id".into(), Dynamic::from(row.id.to_string()));
                    map.insert("method".into(), Dynamic::from(row.method));
                    map.insert("host".into(), Dynamic::from(row.host));
                    map.insert("path".into(), Dynamic::from(row.path));
                    map.insert("status_code".into(), Dynamic::from(row.status_code as i64));
                    map.insert("content_type".into(), Dynamic::from(row.content_type));
                    map.insert("content_length".into(), Dynamic::from(row.content_length));
                    Dynamic::from(map)
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_details(&mut self, id: &str) -> Dynamic {
        let Ok(txn_id) = TransactionId::from_str(id) else {
            return Dynamic::UNIT;
        };
        match self.block_on(self.persistence.get_full(txn_id)) {
            Ok(details) => {
                let mut map = Map::new();
                map.insert("method".into(), Dynamic::from(details.request.method));
                map.insert("host".into(), Dynamic::from(details.request.host));
                map.insert("path".into(), Dynamic::from(details.request.path));
                map.insert(
                    "response_status".into(),
                    Dynamic::from(details.response_status),
                );
                map.insert(
                    "response_status_code".into(),
                    Dynamic::from(details.response_status_code as i64),
                );
                map.insert(
                    "response_length".into(),
                    Dynamic::from(details.response_length),
                );
                map.insert("note".into(), Dynamic::from(details.note));
                map.insert("metadata".into(), json_to_dynamic(details.metadata));
                Dynamic::from(map)
            }
            Err(_) => Dynamic::UNIT,
        }
    }

    pub fn get_metadata(&mut self, id: &str) -> Dynamic {
        let Ok(txn_id) = TransactionId::from_str(id) else {
            return Dynamic::UNIT;
        };
        self.block_on(self.persistence.get_metadata(txn_id))
            .map(json_to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    }

    pub fn set_metadata(&mut self, id: &str, table: Map) {
        let Ok(txn_id) = TransactionId::from_str(id) else {
            return;
        };
        let mut obj = serde_json::Map::new();
        for (k, v) in table {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        let _ = self.block_on(
            self.persistence
                .update_metadata(serde_json::Value::Object(obj), &[txn_id]),
        );
    }

    pub fn get_note(&mut self, id: &str) -> String {
        let Ok(txn_id) = TransactionId::from_str(id) else {
            return String::new();
        };
        self.block_on(self.persistence.get_note(txn_id)).unwrap_or_default()
    }

    pub fn set_note(&mut self, id: &str, text: &str) {
        let Ok(txn_id) = TransactionId::from_str(id) else {
            return;
        };
        let _ = self.block_on(self.persistence.update_note(txn_id, text));
    }

    pub fn search_by_metadata(&mut self, json_path: &str, value: &str) -> Vec<Dynamic> {
        self.block_on(self.persistence.search_by_metadata(json_path, value))
            .map(|ids| ids.into_iter().map(|id| Dynamic::from(id.to_string())).collect())
            .unwrap_or_default()
    }
}

//! `marasi.settings` (spec.md §4.8) — per-extension settings, persisted via the
//! extension repository collaborator.

use std::sync::Arc;

use rhai::Map;

use crate::persistence::Persistence;
use crate::scripting::convert::{dynamic_to_json, json_to_dynamic};

#[derive(Clone)]
pub struct SettingsNamespace {
    persistence: Arc<dyn Persistence>,
    extension_id: String,
}

impl SettingsNamespace {
    pub fn new(persistence: Arc<dyn Persistence>, extension_id: String) -> Self {
        SettingsNamespace {
            persistence,
            extension_id,
        }
    }

    /// Fetch-only-if-no-error semantics (spec.md §9 open question, decided in
    /// DESIGN.md): a persistence error yields an empty settings table rather than
    /// propagating to the script.
    pub fn get(&mut self) -> Map {
        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(self.persistence.get_settings_by_id(&self.extension_id))
        });
        match result {
            Ok(value) => json_to_dynamic(value).try_cast::<Map>().unwrap_or_default(),
            Err(_) => Map::new(),
        }
    }

    pub fn set(&mut self, table: Map) {
        let mut obj = serde_json::Map::new();
        for (k, v) in table {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        let _ = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(
                self.persistence
                    .set_settings_by_id(&self.extension_id, serde_json::Value::Object(obj)),
            )
        });
    }
}

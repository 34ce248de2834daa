//! Extension Manager (C7, spec.md §4.7): loads extensions from the persistence
//! collaborator, keeps one [`ScriptRuntime`] per enabled extension, and runs the
//! phase dispatch loop that the Pipeline Coordinator calls into.

use std::path::PathBuf;
use std::sync::Arc;

use rhai::Dynamic;
use tracing::{error, warn};

use chrono::Utc;

use crate::bridge::{Request, Response};
use crate::error::Result;
use crate::persistence::{ExtensionRecord, LogEntry, Persistence};
use crate::proxy::client::OutboundClient;
use crate::scope::Scope;
use crate::scripting::ScriptRuntime;
use crate::transaction::TransactionContext;

/// One loaded extension: its persisted record plus a compiled runtime, ordered
/// ascending by id to give the dispatch loop a stable, deterministic order
/// (spec.md §4.7).
struct LoadedExtension {
    id: String,
    name: String,
    runtime: ScriptRuntime,
}

/// Which half of the transaction a dispatch pass concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response,
}

impl Phase {
    fn is_request(self) -> bool {
        matches!(self, Phase::Request)
    }
}

/// Drains a runtime's `marasi.log`/`print` buffer into the persistence-backed Log
/// Entry stream (spec.md §3 data model, SPEC_FULL.md §A.1) — separate from the
/// `tracing` spans the runtime already emits, which cover operational logging
/// rather than the script-visible log an operator reviews per extension.
async fn persist_runtime_logs(persistence: &Arc<dyn Persistence>, runtime: &ScriptRuntime) {
    for (level, message) in runtime.drain_log_entries() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        };
        if let Err(e) = persistence.insert_log(entry).await {
            warn!(error = %e, "failed to persist extension log entry");
        }
    }
}

/// Owns the ordered extension list and exposes the phase dispatchers the
/// pipeline calls at `RequestExtensions`/`ResponseExtensions` (spec.md §4.5).
pub struct ExtensionManager {
    extensions: Vec<LoadedExtension>,
    persistence: Arc<dyn Persistence>,
}

impl ExtensionManager {
    /// Loads every extension record from persistence, compiling a runtime for
    /// each enabled one. A script that fails to compile is logged and excluded
    /// — one bad extension never prevents the others from loading.
    pub async fn load(
        persistence: Arc<dyn Persistence>,
        config_dir: PathBuf,
        scope: Scope,
        outbound_client: Arc<OutboundClient>,
    ) -> Result<Self> {
        let mut records = persistence.get_extensions().await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut extensions = Vec::with_capacity(records.len());
        for record in records {
            if !record.enabled {
                continue;
            }
            match Self::compile_one(
                &record,
                persistence.clone(),
                config_dir.clone(),
                scope.clone(),
                outbound_client.clone(),
            ) {
                Ok(runtime) => {
                    if let Err(e) = runtime.call_startup().await {
                        error!(extension_id = %record.id, error = %e, "extension startup() failed");
                    }
                    persist_runtime_logs(&persistence, &runtime).await;
                    extensions.push(LoadedExtension {
                        id: record.id,
                        name: record.name,
                        runtime,
                    });
                }
                Err(e) => {
                    error!(extension_id = %record.id, error = %e, "extension failed to compile, skipping");
                }
            }
        }
        Ok(ExtensionManager { extensions, persistence })
    }

    fn compile_one(
        record: &ExtensionRecord,
        persistence: Arc<dyn Persistence>,
        config_dir: PathBuf,
        scope: Scope,
        outbound_client: Arc<OutboundClient>,
    ) -> Result<ScriptRuntime> {
        ScriptRuntime::compile(
            &record.source,
            record.id.clone(),
            record.name.clone(),
            config_dir,
            scope,
            persistence,
            outbound_client,
        )
    }

    /// Recompiles a single extension in place after its source is edited via the
    /// management API, re-running its top level (spec.md §4.8).
    pub async fn reload(
        &mut self,
        name: &str,
        persistence: Arc<dyn Persistence>,
        config_dir: PathBuf,
        scope: Scope,
        outbound_client: Arc<OutboundClient>,
    ) -> Result<()> {
        let record = persistence
            .get_extension_by_name(name)
            .await?
            .ok_or_else(|| crate::error::MarasiError::Internal(format!("unknown extension {name}")))?;
        let runtime = Self::compile_one(&record, persistence, config_dir, scope, outbound_client)?;
        runtime.call_startup().await?;
        self.persist_logs(&runtime).await;
        if let Some(slot) = self.extensions.iter_mut().find(|e| e.name == name) {
            slot.id = record.id;
            slot.runtime = runtime;
        } else {
            self.extensions.push(LoadedExtension {
                id: record.id,
                name: record.name,
                runtime,
            });
            self.extensions.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Ok(())
    }

    /// Drops a disabled/deleted extension from the live dispatch list.
    pub fn unload(&mut self, name: &str) {
        self.extensions.retain(|e| e.name != name);
    }

    /// The dispatch loop (spec.md §4.7): for each enabled extension in id order,
    /// reset its skip flag, run the pre-script intercept hook (marking
    /// `intercepted` on a truthy return), then the process hook unless a prior
    /// extension in this same phase called `skip()`. Stops early if the
    /// transaction was dropped.
    pub async fn dispatch(&self, phase: Phase, ctx: &TransactionContext) {
        let is_request = phase.is_request();
        let mut skip_rest = false;

        for ext in &self.extensions {
            ctx.reset_skip();

            if !skip_rest {
                let arg = self.facade_arg(is_request, ctx, &ext.name);
                match ext.runtime.call_intercept(is_request, arg).await {
                    Ok(true) => ctx.with_transaction_mut(|t| t.metadata.set_intercepted(true)),
                    Ok(false) => {}
                    Err(e) => warn!(extension_id = %ext.id, error = %e, "interceptor failed"),
                }

                let arg = self.facade_arg(is_request, ctx, &ext.name);
                if let Err(e) = ext.runtime.call_process(is_request, arg).await {
                    warn!(extension_id = %ext.id, error = %e, "processor failed");
                }

                self.persist_logs(&ext.runtime).await;

                if ctx.skip_flag() {
                    skip_rest = true;
                }
            }

            if ctx.drop_flag() {
                break;
            }
        }
    }

    /// Drains a runtime's `marasi.log`/`print` buffer into the persistence-backed
    /// Log Entry stream (spec.md §3 data model, SPEC_FULL.md §A.1) — separate from
    /// the `tracing` spans `record_log` already emits, which cover operational
    /// logging rather than the script-visible log an operator reviews per extension.
    async fn persist_logs(&self, runtime: &ScriptRuntime) {
        persist_runtime_logs(&self.persistence, runtime).await;
    }

    fn facade_arg(&self, is_request: bool, ctx: &TransactionContext, extension_name: &str) -> Dynamic {
        if is_request {
            Dynamic::from(Request::new(ctx.clone(), ctx.request_handle(), extension_name.to_string()))
        } else {
            Dynamic::from(Response::new(ctx.clone(), ctx.response_handle(), extension_name.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config_dir;
    use crate::persistence::SqlitePersistence;
    use crate::transaction::message::HttpMessage;
    use crate::transaction::Transaction;
    use bytes::Bytes;

    fn sample_record(source: &str) -> ExtensionRecord {
        ExtensionRecord {
            id: "00000000-0000-0000-0000-000000000001".to_string(),
            name: "noop".to_string(),
            author: String::new(),
            source_url: String::new(),
            source: source.to_string(),
            enabled: true,
            updated_at: chrono::Utc::now(),
            description: String::new(),
            settings: serde_json::json!({}),
        }
    }

    async fn manager_with_source(source: &str) -> ExtensionManager {
        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::connect(std::path::Path::new(":memory:")).await.unwrap());
        let client = Arc::new(OutboundClient::new(&crate::config::ConnectionPoolConfig::default()));
        let record = sample_record(source);
        let runtime = ExtensionManager::compile_one(
            &record,
            persistence.clone(),
            default_config_dir(),
            Scope::new(),
            client,
        )
        .unwrap();
        ExtensionManager {
            extensions: vec![LoadedExtension {
                id: record.id,
                name: record.name,
                runtime,
            }],
            persistence,
        }
    }

    fn sample_ctx() -> TransactionContext {
        let txn = Transaction::new("https", "GET", "example.com", "/", Bytes::new());
        let msg = HttpMessage::new_request("GET", "https://example.com/", "HTTP/1.1", "");
        TransactionContext::new(txn, msg)
    }

    #[tokio::test]
    async fn intercept_hook_sets_intercepted_metadata() {
        let manager = manager_with_source(
            r#"
            fn interceptRequest(req) { true }
        "#,
        )
        .await;
        let ctx = sample_ctx();
        manager.dispatch(Phase::Request, &ctx).await;
        assert!(ctx.with_transaction(|t| t.metadata.is_intercepted()));
    }

    #[tokio::test]
    async fn dispatch_persists_script_log_lines() {
        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::connect(std::path::Path::new(":memory:")).await.unwrap());
        let client = Arc::new(OutboundClient::new(&crate::config::ConnectionPoolConfig::default()));
        let record = sample_record(
            r#"
            fn processRequest(req) { marasi.log("hello from extension"); }
        "#,
        );
        let runtime = ExtensionManager::compile_one(
            &record,
            persistence.clone(),
            default_config_dir(),
            Scope::new(),
            client,
        )
        .unwrap();
        let manager = ExtensionManager {
            extensions: vec![LoadedExtension {
                id: record.id,
                name: record.name,
                runtime,
            }],
            persistence: persistence.clone(),
        };

        let ctx = sample_ctx();
        manager.dispatch(Phase::Request, &ctx).await;

        let logs = persistence.get_logs(10).await.unwrap();
        assert!(logs.iter().any(|l| l.message.contains("hello from extension")));
    }

    #[tokio::test]
    async fn drop_short_circuits_remaining_extensions() {
        let manager = manager_with_source(
            r#"
            fn processRequest(req) { req.drop(); }
        "#,
        )
        .await;
        let ctx = sample_ctx();
        manager.dispatch(Phase::Request, &ctx).await;
        assert!(ctx.drop_flag());
    }
}

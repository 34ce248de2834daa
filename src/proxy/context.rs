//! Shared application state: the collaborator bundle built once at startup and
//! handed to every connection the Connect Handler (C4) spawns.

use std::path::PathBuf;
use std::sync::Arc;

use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::error::Result;
use crate::extensions::ExtensionManager;
use crate::intercept::InterceptionQueue;
use crate::persistence::{Persistence, SqlitePersistence};
use crate::pipeline::PipelineDeps;
use crate::proxy::client::OutboundClient;
use crate::scope::{MatchType, Scope};
use crate::waypoints::WaypointRouter;

/// Everything a connection needs to mint a leaf, run the pipeline, and persist
/// a transaction. Cheap to clone — every field is an `Arc`/handle type, mirroring
/// how `PipelineDeps` itself is shared (spec.md §5 "shared resources").
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ca: Arc<CertificateAuthority>,
    pub pipeline: PipelineDeps,
}

impl AppState {
    /// Wires every collaborator from a loaded [`Config`] (spec.md §A.4 bootstrap):
    /// certificate authority, persistence, scope, waypoints, outbound client,
    /// extensions, and the interception queue.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.config_dir)?;
        std::fs::create_dir_all(config.extensions_path())?;

        let ca = Arc::new(CertificateAuthority::load_or_create(&config.config_dir)?);

        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::connect(&config.database_path()).await?);

        let scope = Scope::new();
        scope.set_default_allow(config.scope_default_allow);
        for rule in &config.scope_rules {
            let match_type = if rule.match_type == "url" {
                MatchType::Url
            } else {
                MatchType::Host
            };
            scope.add_rule(&rule.pattern, match_type, rule.exclude)?;
        }

        let waypoints = WaypointRouter::new();
        for wp in &config.waypoints {
            waypoints.set(wp.host.clone(), wp.destination.clone());
        }

        let outbound = Arc::new(OutboundClient::new(&config.connection_pool));

        let extensions = Arc::new(tokio::sync::RwLock::new(
            ExtensionManager::load(
                persistence.clone(),
                config.extensions_path(),
                scope.clone(),
                outbound.clone(),
            )
            .await?,
        ));

        let intercept = InterceptionQueue::new();

        let pipeline = PipelineDeps {
            scope,
            extensions,
            waypoints,
            outbound,
            persistence,
            intercept,
        };

        Ok(AppState {
            config: Arc::new(config),
            ca,
            pipeline,
        })
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.config.extensions_path()
    }
}

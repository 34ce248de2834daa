//! Configuration surface (spec.md §A.3): listen address, config directory, database
//! path, verbosity, seed scope rules, and seed waypoints.

mod listen;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use listen::{ConnectionPoolConfig, MetricsConfig};

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_verbosity() -> String {
    "info".to_string()
}

fn default_database_file() -> String {
    "marasi.db".to_string()
}

fn default_extensions_dir() -> String {
    "extensions".to_string()
}

/// A scope rule seeded from config, loaded into the [`crate::scope::Scope`] at
/// startup (spec.md §4.2).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScopeRuleConfig {
    pub pattern: String,
    #[serde(rename = "type", default = "default_match_type")]
    pub match_type: String,
    #[serde(default)]
    pub exclude: bool,
}

fn default_match_type() -> String {
    "host".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WaypointConfig {
    pub host: String,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Defaults to the OS-specific user config directory (spec.md §A.3); set
    /// explicitly by `--config-dir`/`MARASI_CONFIG_DIR` at the CLI layer.
    #[serde(skip)]
    pub config_dir: PathBuf,

    #[serde(default = "default_database_file")]
    pub database_file: String,

    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: String,

    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    #[serde(default)]
    pub scope_rules: Vec<ScopeRuleConfig>,

    #[serde(default)]
    pub scope_default_allow: bool,

    #[serde(default)]
    pub waypoints: Vec<WaypointConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            config_dir: default_config_dir(),
            database_file: default_database_file(),
            extensions_dir: default_extensions_dir(),
            verbosity: default_verbosity(),
            metrics: MetricsConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            scope_rules: Vec::new(),
            scope_default_allow: true,
            waypoints: Vec::new(),
        }
    }
}

/// The OS-specific user config directory (spec.md §A.3), falling back to
/// `./.marasi` when the platform provides none (e.g. minimal containers).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("marasi"))
        .unwrap_or_else(|| PathBuf::from(".marasi"))
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        if config.config_dir.as_os_str().is_empty() {
            config.config_dir = default_config_dir();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join(&self.database_file)
    }

    pub fn extensions_path(&self) -> PathBuf {
        self.config_dir.join(&self.extensions_dir)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("invalid listen address: '{}'", self.listen);
        }
        for rule in &self.scope_rules {
            if rule.match_type != "host" && rule.match_type != "url" {
                anyhow::bail!(
                    "scope rule type must be 'host' or 'url', got '{}'",
                    rule.match_type
                );
            }
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                anyhow::bail!("invalid scope pattern '{}': {e}", rule.pattern);
            }
        }
        match self.verbosity.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("invalid verbosity level: '{other}'"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen, "127.0.0.1:8080");
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = r#"
listen: "0.0.0.0:9000"
verbosity: debug
scope_rules:
  - pattern: ".*\\.example\\.com"
    type: host
    exclude: false
waypoints:
  - host: "api.example.com"
    destination: "staging.example.com"
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.config_dir = default_config_dir();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.scope_rules.len(), 1);
        assert_eq!(config.waypoints[0].destination, "staging.example.com");
    }

    #[test]
    fn rejects_invalid_listen_address() {
        let mut config = Config::default();
        config.listen = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_scope_pattern() {
        let mut config = Config::default();
        config.scope_rules.push(ScopeRuleConfig {
            pattern: "(unterminated".to_string(),
            match_type: "host".to_string(),
            exclude: false,
        });
        assert!(config.validate().is_err());
    }
}

//! Waypoint Router (C10): maps `host:port` override rules applied after scripts but
//! before the outbound dial.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A hostname → override `host:port` mapping, unique per hostname (spec.md §3).
#[derive(Clone)]
pub struct WaypointRouter {
    routes: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for WaypointRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl WaypointRouter {
    pub fn new() -> Self {
        WaypointRouter {
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn set(&self, host: impl Into<String>, override_host_port: impl Into<String>) {
        self.routes.write().insert(host.into(), override_host_port.into());
    }

    pub fn remove(&self, host: &str) {
        self.routes.write().remove(host);
    }

    /// `lookup(host:port) → host:port` — returns the override if one exists for the
    /// bare host part, otherwise returns the input unchanged.
    pub fn lookup(&self, host_port: &str) -> String {
        let host = host_port.split(':').next().unwrap_or(host_port);
        self.routes
            .read()
            .get(host)
            .cloned()
            .unwrap_or_else(|| host_port.to_string())
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.routes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_override_for_matching_host() {
        let router = WaypointRouter::new();
        router.set("old.example", "new.example:9443");
        assert_eq!(router.lookup("old.example:443"), "new.example:9443");
    }

    #[test]
    fn lookup_passes_through_unmatched_hosts() {
        let router = WaypointRouter::new();
        assert_eq!(router.lookup("untouched.example:443"), "untouched.example:443");
    }

    #[test]
    fn remove_clears_a_waypoint() {
        let router = WaypointRouter::new();
        router.set("old.example", "new.example:9443");
        router.remove("old.example");
        assert_eq!(router.lookup("old.example:443"), "old.example:443");
    }
}

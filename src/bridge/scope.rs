//! Scope facade (spec.md §4.9): mirrors the Scope Filter operations for scripts.

use crate::bridge::request::Request;
use crate::bridge::response::Response;
use crate::scope::{MatchType, Scope};

#[derive(Clone)]
pub struct ScopeHandle {
    scope: Scope,
}

impl ScopeHandle {
    pub fn new(scope: Scope) -> Self {
        ScopeHandle { scope }
    }

    pub fn add_include_host(&mut self, pattern: &str) -> bool {
        self.scope.add_rule(pattern, MatchType::Host, false).is_ok()
    }

    pub fn add_include_url(&mut self, pattern: &str) -> bool {
        self.scope.add_rule(pattern, MatchType::Url, false).is_ok()
    }

    pub fn add_exclude_host(&mut self, pattern: &str) -> bool {
        self.scope.add_rule(pattern, MatchType::Host, true).is_ok()
    }

    pub fn add_exclude_url(&mut self, pattern: &str) -> bool {
        self.scope.add_rule(pattern, MatchType::Url, true).is_ok()
    }

    pub fn remove_include_host(&mut self, pattern: &str) {
        self.scope.remove_rule(pattern, MatchType::Host, false);
    }

    pub fn remove_include_url(&mut self, pattern: &str) {
        self.scope.remove_rule(pattern, MatchType::Url, false);
    }

    pub fn remove_exclude_host(&mut self, pattern: &str) {
        self.scope.remove_rule(pattern, MatchType::Host, true);
    }

    pub fn remove_exclude_url(&mut self, pattern: &str) {
        self.scope.remove_rule(pattern, MatchType::Url, true);
    }

    pub fn clear(&mut self) {
        self.scope.clear_rules();
    }

    pub fn set_default_allow(&mut self, allow: bool) {
        self.scope.set_default_allow(allow);
    }

    pub fn matches_host(&mut self, host: &str) -> bool {
        self.scope.matches_string(host, MatchType::Host)
    }

    pub fn matches_url(&mut self, url: &str) -> bool {
        self.scope.matches_string(url, MatchType::Url)
    }

    pub fn matches_request(&mut self, request: &mut Request) -> bool {
        self.scope.matches(&request.host(), &request.url())
    }

    pub fn matches_response(&mut self, response: &mut Response) -> bool {
        let (host, url) = response.originating_host_and_url();
        self.scope.matches(&host, &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_then_exclude_round_trips_through_facade() {
        let mut handle = ScopeHandle::new(Scope::new());
        handle.add_include_host(".*");
        handle.add_exclude_host("blocked\\.example");
        assert!(handle.matches_host("example.com"));
        assert!(!handle.matches_host("blocked.example"));
    }

    #[test]
    fn clear_resets_to_default_allow() {
        let mut handle = ScopeHandle::new(Scope::new());
        handle.add_include_host("only\\.example");
        handle.clear();
        handle.set_default_allow(true);
        assert!(handle.matches_host("anything.example"));
    }
}

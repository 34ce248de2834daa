//! URL facade (spec.md §4.9). `set_param`/`del_param` re-encode the query.

#[derive(Debug, Clone)]
pub struct Url {
    scheme: String,
    host: String,
    path: String,
    query_pairs: Vec<(String, String)>,
}

impl Url {
    pub fn parse(raw: &str) -> Self {
        let (before_query, query) = match raw.split_once('?') {
            Some((b, q)) => (b, q),
            None => (raw, ""),
        };

        let (scheme, rest) = match before_query.split_once("://") {
            Some((s, r)) => (s.to_string(), r),
            None => (String::new(), before_query),
        };

        let (host, path) = match rest.split_once('/') {
            Some((h, p)) => (h.to_string(), format!("/{p}")),
            None => (rest.to_string(), String::new()),
        };

        let query_pairs = query
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| {
                let (k, v) = pair
                    .split_once('=')
                    .unwrap_or((pair, ""));
                (urlencoding::decode(k).unwrap_or_default().into_owned(),
                 urlencoding::decode(v).unwrap_or_default().into_owned())
            })
            .collect();

        Url {
            scheme,
            host,
            path,
            query_pairs,
        }
    }

    pub fn string(&mut self) -> String {
        let mut out = String::new();
        if !self.scheme.is_empty() {
            out.push_str(&self.scheme);
            out.push_str("://");
        }
        out.push_str(&self.host);
        out.push_str(&self.path);
        if !self.query_pairs.is_empty() {
            out.push('?');
            out.push_str(&self.encode_query());
        }
        out
    }

    fn encode_query(&self) -> String {
        self.query_pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn scheme(&mut self) -> String {
        self.scheme.clone()
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_string();
    }

    pub fn host(&mut self) -> String {
        self.host.clone()
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn path(&mut self) -> String {
        self.path.clone()
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub fn query(&mut self) -> String {
        self.encode_query()
    }

    pub fn get_param(&mut self, key: &str) -> String {
        self.query_pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn set_param(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.query_pairs.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.query_pairs.push((key.to_string(), value.to_string()));
        }
    }

    pub fn del_param(&mut self, key: &str) {
        self.query_pairs.retain(|(k, _)| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_a_simple_url() {
        let mut url = Url::parse("https://example.com/path?a=1&b=2");
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.path(), "/path");
        assert_eq!(url.get_param("a"), "1");
        assert_eq!(url.get_param("b"), "2");
    }

    #[test]
    fn set_param_reencodes_query() {
        let mut url = Url::parse("https://example.com/path?a=1");
        url.set_param("a", "hello world");
        assert_eq!(url.string(), "https://example.com/path?a=hello%20world");
    }

    #[test]
    fn del_param_removes_entry_and_reencodes() {
        let mut url = Url::parse("https://example.com/path?a=1&b=2");
        url.del_param("a");
        assert_eq!(url.string(), "https://example.com/path?b=2");
    }
}

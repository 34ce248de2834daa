//! Cookie facade (spec.md §4.9).

#[derive(Debug, Clone, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub max_age: Option<i64>,
    pub same_site: String,
    pub expires: Option<String>,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            same_site: "default".to_string(),
            ..Default::default()
        }
    }

    pub fn name(&mut self) -> String {
        self.name.clone()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn value(&mut self) -> String {
        self.value.clone()
    }

    pub fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }

    pub fn domain(&mut self) -> String {
        self.domain.clone().unwrap_or_default()
    }

    pub fn set_domain(&mut self, domain: &str) {
        self.domain = Some(domain.to_string());
    }

    pub fn path(&mut self) -> String {
        self.path.clone().unwrap_or_default()
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = Some(path.to_string());
    }

    pub fn secure(&mut self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn http_only(&mut self) -> bool {
        self.http_only
    }

    pub fn set_http_only(&mut self, http_only: bool) {
        self.http_only = http_only;
    }

    pub fn max_age(&mut self) -> i64 {
        self.max_age.unwrap_or(-1)
    }

    pub fn set_max_age(&mut self, max_age: i64) {
        self.max_age = Some(max_age);
    }

    /// `same_site` maps to `lax|strict|none|default` (spec.md §4.9).
    pub fn same_site(&mut self) -> String {
        self.same_site.clone()
    }

    pub fn set_same_site(&mut self, same_site: &str) {
        self.same_site = match same_site.to_lowercase().as_str() {
            "lax" => "lax",
            "strict" => "strict",
            "none" => "none",
            _ => "default",
        }
        .to_string();
    }

    pub fn expires(&mut self) -> String {
        self.expires.clone().unwrap_or_default()
    }

    pub fn set_expires(&mut self, expires: &str) {
        self.expires = Some(expires.to_string());
    }

    pub fn serialize(&mut self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = &self.expires {
            out.push_str(&format!("; Expires={expires}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        match self.same_site.as_str() {
            "lax" => out.push_str("; SameSite=Lax"),
            "strict" => out.push_str("; SameSite=Strict"),
            "none" => out.push_str("; SameSite=None"),
            _ => {}
        }
        out
    }

    /// Parse a single `name=value` pair from a `Cookie:` request header.
    pub fn parse_request_pair(pair: &str) -> Option<Cookie> {
        let (name, value) = pair.trim().split_once('=')?;
        Some(Cookie::new(name.trim(), value.trim()))
    }

    /// Parse a full `Set-Cookie:` response header value.
    pub fn parse_set_cookie(header_value: &str) -> Option<Cookie> {
        let mut parts = header_value.split(';');
        let first = parts.next()?;
        let (name, value) = first.trim().split_once('=')?;
        let mut cookie = Cookie::new(name.trim(), value.trim());

        for attr in parts {
            let attr = attr.trim();
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.to_lowercase().as_str() {
                "domain" => cookie.domain = Some(val.to_string()),
                "path" => cookie.path = Some(val.to_string()),
                "max-age" => cookie.max_age = val.parse().ok(),
                "expires" => cookie.expires = Some(val.to_string()),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.set_same_site(val),
                _ => {}
            }
        }
        Some(cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_round_trips_basic_attributes() {
        let mut cookie = Cookie::new("session", "abc123");
        cookie.set_domain("example.com");
        cookie.set_secure(true);
        cookie.set_same_site("Lax");
        let serialized = cookie.serialize();
        assert!(serialized.contains("session=abc123"));
        assert!(serialized.contains("Domain=example.com"));
        assert!(serialized.contains("Secure"));
        assert!(serialized.contains("SameSite=Lax"));
    }

    #[test]
    fn parse_set_cookie_extracts_attributes() {
        let cookie =
            Cookie::parse_set_cookie("id=42; Path=/; HttpOnly; SameSite=Strict").unwrap();
        assert_eq!(cookie.name, "id");
        assert_eq!(cookie.value, "42");
        assert_eq!(cookie.path, Some("/".to_string()));
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, "strict");
    }

    #[test]
    fn unknown_same_site_value_falls_back_to_default() {
        let mut cookie = Cookie::new("a", "b");
        cookie.set_same_site("bogus");
        assert_eq!(cookie.same_site(), "default");
    }
}

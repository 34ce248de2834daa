//! Request facade (spec.md §4.9).

use rhai::{Dynamic, Map};

use crate::bridge::cookie::Cookie;
use crate::bridge::header::Header;
use crate::bridge::url::Url;
use crate::transaction::message::MessageHandle;
use crate::transaction::TransactionContext;

#[derive(Clone)]
pub struct Request {
    ctx: TransactionContext,
    handle: MessageHandle,
    extension_name: String,
}

impl Request {
    pub fn new(ctx: TransactionContext, handle: MessageHandle, extension_name: String) -> Self {
        Request {
            ctx,
            handle,
            extension_name,
        }
    }

    pub fn id(&mut self) -> String {
        self.ctx.id().to_string()
    }

    pub fn method(&mut self) -> String {
        self.handle.with(|m| m.method.clone())
    }

    pub fn set_method(&mut self, method: &str) {
        self.handle.with_mut(|m| m.method = method.to_string());
    }

    pub fn url(&mut self) -> String {
        self.handle.with(|m| m.url.clone())
    }

    pub fn set_url(&mut self, url: &str) {
        self.handle.with_mut(|m| m.url = url.to_string());
    }

    pub fn path(&mut self) -> String {
        Url::parse(&self.url()).path()
    }

    pub fn host(&mut self) -> String {
        self.handle.with(|m| {
            m.headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        })
    }

    /// `set_host` records `original_host_header` on the first call and updates
    /// `override_host_header` on every call (spec.md §9 open question, decided in
    /// DESIGN.md), and rewrites the `Host` header and the outbound URL's host.
    pub fn set_host(&mut self, new_host: &str) {
        let original = self.host();
        self.ctx
            .with_transaction_mut(|t| t.metadata.record_host_override(&original, new_host));
        if let Ok(value) = http::HeaderValue::from_str(new_host) {
            self.handle.with_mut(|m| {
                m.headers.insert(http::header::HOST, value);
            });
        }
        let mut url = Url::parse(&self.url());
        url.set_host(new_host);
        self.set_url(&url.string());
    }

    pub fn scheme(&mut self) -> String {
        Url::parse(&self.url()).scheme()
    }

    pub fn proto(&mut self) -> String {
        self.handle.with(|m| m.proto.clone())
    }

    pub fn remote_addr(&mut self) -> String {
        self.handle.with(|m| m.remote_addr.clone())
    }

    /// Body reads buffer the body bytes and restore them so subsequent reads see
    /// the same payload (spec.md §4.9) — trivially satisfied since the body is
    /// stored as owned `Bytes` and cloned on read, never drained.
    pub fn body(&mut self) -> String {
        self.handle
            .with(|m| String::from_utf8_lossy(&m.body).into_owned())
    }

    /// `set_body` updates `Content-Length` (spec.md §4.9).
    pub fn set_body(&mut self, body: &str) {
        self.handle
            .with_mut(|m| m.set_body(bytes::Bytes::from(body.to_string())));
    }

    pub fn headers(&mut self) -> Header {
        Header::new(self.handle.clone())
    }

    pub fn content_type(&mut self) -> String {
        self.handle.with(|m| m.content_type())
    }

    pub fn cookie(&mut self, name: &str) -> Dynamic {
        self.cookies_vec()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| Dynamic::from(c))
            .unwrap_or(Dynamic::UNIT)
    }

    pub fn cookies(&mut self) -> Vec<Dynamic> {
        self.cookies_vec().into_iter().map(Dynamic::from).collect()
    }

    fn cookies_vec(&mut self) -> Vec<Cookie> {
        self.handle.with(|m| {
            m.headers
                .get_all(http::header::COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(Cookie::parse_request_pair)
                .collect()
        })
    }

    pub fn metadata(&mut self) -> Map {
        self.ctx.with_transaction(|t| {
            let mut map = Map::new();
            for (k, v) in t.metadata.as_map() {
                map.insert(k.clone().into(), crate::scripting::convert::json_to_dynamic(v.clone()));
            }
            map
        })
    }

    /// `set_metadata(t)` writes under the extension's name-keyed slot in the
    /// transaction metadata — it NEVER replaces the whole metadata map (spec.md
    /// §4.9, §8 invariant 8).
    pub fn set_metadata(&mut self, fields: Map) {
        let mut obj = serde_json::Map::new();
        for (k, v) in fields {
            obj.insert(
                k.to_string(),
                crate::scripting::convert::dynamic_to_json(v),
            );
        }
        let extension_name = self.extension_name.clone();
        self.ctx
            .with_transaction_mut(|t| t.metadata.set_extension_slot(&extension_name, obj));
    }

    pub fn drop(&mut self) {
        self.ctx.set_dropped();
    }

    pub fn skip(&mut self) {
        self.ctx.set_skip();
    }

    /// Exposes the underlying message handle so `marasi.builder(req)` can prime a
    /// [`crate::bridge::RequestBuilder`] from the live request (spec.md §4.8).
    pub(crate) fn handle(&self) -> MessageHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::message::HttpMessage;
    use crate::transaction::Transaction;
    use bytes::Bytes;

    fn sample_request() -> Request {
        let txn = Transaction::new("https", "GET", "old.example", "/", Bytes::new());
        let msg = HttpMessage::new_request("GET", "https://old.example/", "HTTP/1.1", "");
        let ctx = TransactionContext::new(txn, msg);
        let handle = ctx.request_handle();
        Request::new(ctx, handle, "my-extension".to_string())
    }

    #[test]
    fn set_host_rewrites_host_header_and_records_metadata() {
        let mut req = sample_request();
        req.headers().set("Host", "old.example");
        req.set_host("new.example");
        assert_eq!(req.host(), "new.example");

        let meta = req.metadata();
        assert_eq!(
            meta.get("original_host_header").unwrap().clone().into_string().unwrap(),
            "old.example"
        );
        assert_eq!(
            meta.get("override_host_header").unwrap().clone().into_string().unwrap(),
            "new.example"
        );
    }

    #[test]
    fn set_body_updates_content_length_header() {
        let mut req = sample_request();
        req.set_body("hello");
        assert_eq!(req.headers().get("Content-Length").into_string().unwrap(), "5");
        assert_eq!(req.body(), "hello");
    }

    #[test]
    fn set_metadata_scopes_under_extension_name() {
        let mut req = sample_request();
        let mut fields = Map::new();
        fields.insert("k".into(), Dynamic::from("v".to_string()));
        req.set_metadata(fields);

        let meta = req.metadata();
        let slot = meta.get("my-extension").unwrap().clone().cast::<Map>();
        assert_eq!(slot.get("k").unwrap().clone().into_string().unwrap(), "v");
    }

    #[test]
    fn drop_and_skip_set_context_flags() {
        let mut req = sample_request();
        req.drop();
        req.skip();
        assert!(req.ctx.drop_flag());
        assert!(req.ctx.skip_flag());
    }
}

//! Response facade (spec.md §4.9): same shape as Request, plus status fields.

use rhai::{Dynamic, Map};

use crate::bridge::cookie::Cookie;
use crate::bridge::header::Header;
use crate::transaction::message::MessageHandle;
use crate::transaction::TransactionContext;

#[derive(Clone)]
pub struct Response {
    ctx: TransactionContext,
    handle: MessageHandle,
    extension_name: String,
}

impl Response {
    pub fn new(ctx: TransactionContext, handle: MessageHandle, extension_name: String) -> Self {
        Response {
            ctx,
            handle,
            extension_name,
        }
    }

    pub fn id(&mut self) -> String {
        self.ctx.id().to_string()
    }

    pub fn status(&mut self) -> String {
        self.handle.with(|m| m.status_text.clone())
    }

    pub fn status_code(&mut self) -> i64 {
        self.handle.with(|m| m.status_code as i64)
    }

    /// `set_status_code(n)` also updates the status text to `"<n> <standardReason>"`
    /// (spec.md §4.9).
    pub fn set_status_code(&mut self, code: i64) {
        self.handle.with_mut(|m| m.set_status_code(code as i32));
    }

    pub fn length(&mut self) -> i64 {
        self.handle.with(|m| m.body.len() as i64)
    }

    pub fn body(&mut self) -> String {
        self.handle
            .with(|m| String::from_utf8_lossy(&m.body).into_owned())
    }

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

    pub fn cookies(&mut self) -> Vec<Dynamic> {
        self.handle
            .with(|m| {
                m.headers
                    .get_all(http::header::SET_COOKIE)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .filter_map(Cookie::parse_set_cookie)
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .map(Dynamic::from)
            .collect()
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

    /// The originating request's host and URL, for the Scope facade's
    /// `matches(res)` delegation (spec.md §4.9) — a response carries no host/url
    /// of its own.
    pub(crate) fn originating_host_and_url(&self) -> (String, String) {
        self.ctx.with_transaction(|t| {
            (t.host.clone(), format!("{}://{}{}", t.scheme, t.host, t.path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::message::HttpMessage;
    use crate::transaction::Transaction;
    use bytes::Bytes;

    fn sample_response() -> Response {
        let txn = Transaction::new("https", "GET", "example.com", "/", Bytes::new());
        let req_msg = HttpMessage::new_request("GET", "https://example.com/", "HTTP/1.1", "");
        let ctx = TransactionContext::new(txn, req_msg);
        ctx.install_response_message(HttpMessage::new_response());
        let handle = ctx.response_handle();
        Response::new(ctx, handle, "my-extension".to_string())
    }

    #[test]
    fn set_status_code_updates_status_text() {
        let mut res = sample_response();
        res.set_status_code(404);
        assert_eq!(res.status(), "404 Not Found");
        assert_eq!(res.status_code(), 404);
    }

    #[test]
    fn set_body_updates_length() {
        let mut res = sample_response();
        res.set_body("hello world");
        assert_eq!(res.length(), 11);
    }
}

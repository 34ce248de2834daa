//! RequestBuilder facade (spec.md §4.9): scripts assemble and fire outbound HTTP
//! requests through this, independent of the in-flight transaction's own request.

use std::sync::Arc;

use rhai::{Dynamic, FnPtr, Map};
use tracing::warn;

use crate::bridge::cookie::Cookie;
use crate::bridge::header::Header;
use crate::bridge::response::Response;
use crate::bridge::url::Url;
use crate::proxy::client::{OutboundClient, SCRIPT_ORIGIN_HEADER};
use crate::scripting::convert::dynamic_to_json;
use crate::scripting::ScriptState;
use crate::transaction::message::{HttpMessage, MessageHandle};

#[derive(Clone)]
pub struct RequestBuilder {
    message: HttpMessage,
    client: Arc<OutboundClient>,
    extension_id: String,
    extension_name: String,
    script_state: Arc<tokio::sync::Mutex<ScriptState>>,
}

impl RequestBuilder {
    pub fn new(
        client: Arc<OutboundClient>,
        extension_id: String,
        extension_name: String,
        script_state: Arc<tokio::sync::Mutex<ScriptState>>,
    ) -> Self {
        RequestBuilder {
            message: HttpMessage::new_request("GET", "", "HTTP/1.1", ""),
            client,
            extension_id,
            extension_name,
            script_state,
        }
    }

    /// Primes method/URL/headers/body from a live request handle (`marasi.builder(req)`,
    /// spec.md §4.8).
    pub fn from_request(
        client: Arc<OutboundClient>,
        extension_id: String,
        extension_name: String,
        script_state: Arc<tokio::sync::Mutex<ScriptState>>,
        source: &MessageHandle,
    ) -> Self {
        let message = source.with(|m| m.clone());
        RequestBuilder {
            message,
            client,
            extension_id,
            extension_name,
            script_state,
        }
    }

    pub fn set_method(&mut self, method: &str) {
        self.message.method = method.to_string();
    }

    pub fn set_url(&mut self, url: &str) {
        self.message.url = url.to_string();
    }

    pub fn set_url_object(&mut self, mut url: Url) {
        self.message.url = url.string();
    }

    pub fn set_body(&mut self, body: &str) {
        self.message.set_body(bytes::Bytes::from(body.to_string()));
    }

    pub fn set_headers(&mut self, header: Header) {
        let mut header = header;
        for (key, values) in header.to_table() {
            if let Some(values) = values.try_cast::<Vec<Dynamic>>() {
                for v in values {
                    if let Some(s) = v.clone().into_string().ok() {
                        if let (Ok(name), Ok(value)) = (
                            http::HeaderName::try_from(key.as_str()),
                            http::HeaderValue::from_str(&s),
                        ) {
                            self.message.headers.append(name, value);
                        }
                    }
                }
            }
        }
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(val)) = (
            http::HeaderName::try_from(key),
            http::HeaderValue::from_str(value),
        ) {
            self.message.headers.append(name, val);
        }
    }

    pub fn set_cookie(&mut self, mut cookie: Cookie) {
        if let Ok(val) = http::HeaderValue::from_str(&format!("{}={}", cookie.name(), cookie.value())) {
            self.message.headers.append(http::header::COOKIE, val);
        }
    }

    pub fn set_cookies(&mut self, cookies: Vec<Dynamic>) {
        for c in cookies {
            if let Some(cookie) = c.try_cast::<Cookie>() {
                self.set_cookie(cookie);
            }
        }
    }

    pub fn set_metadata(&mut self, fields: Map) {
        let mut obj = serde_json::Map::new();
        for (k, v) in fields {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        if let Ok(value) = serde_json::to_string(&obj) {
            if let Ok(header_value) = http::HeaderValue::from_str(&value) {
                self.message
                    .headers
                    .insert("x-marasi-metadata", header_value);
            }
        }
    }

    fn wrap_response(extension_name: &str, response: HttpMessage) -> Response {
        let ctx = crate::transaction::TransactionContext::new(
            crate::transaction::Transaction::new("", "", "", "", bytes::Bytes::new()),
            HttpMessage::new_request("", "", "HTTP/1.1", ""),
        );
        ctx.install_response_message(response);
        Response::new(ctx, ctx.response_handle(), extension_name.to_string())
    }

    fn tag_for_send(&mut self) {
        if let Ok(v) = http::HeaderValue::from_str("true") {
            self.message.headers.insert(SCRIPT_ORIGIN_HEADER, v);
        }
        if let Ok(v) = http::HeaderValue::from_str(&self.extension_id) {
            self.message.headers.insert("x-extension-id", v);
        }
        if !self.message.headers.contains_key("x-marasi-metadata") {
            let default = serde_json::json!({ "extension_id": self.extension_id });
            if let Ok(value) = serde_json::to_string(&default) {
                if let Ok(header_value) = http::HeaderValue::from_str(&value) {
                    self.message.headers.insert("x-marasi-metadata", header_value);
                }
            }
        }
    }

    /// `send() -> (response, err)`. Blocks the calling script thread; permitted
    /// because the surrounding multi-threaded runtime allows `block_in_place`
    /// (spec.md §5 suspension points).
    pub fn send(&mut self) -> Dynamic {
        self.tag_for_send();
        let message = self.message.clone();
        let client = self.client.clone();
        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(client.send(&message))
        });

        let mut tuple = Map::new();
        match result {
            Ok(response) => {
                tuple.insert(
                    "response".into(),
                    Dynamic::from(Self::wrap_response(&self.extension_name, response)),
                );
                tuple.insert("err".into(), Dynamic::UNIT);
            }
            Err(e) => {
                tuple.insert("response".into(), Dynamic::UNIT);
                tuple.insert("err".into(), Dynamic::from(e.to_string()));
            }
        }
        Dynamic::from(tuple)
    }

    /// `send_async(callback)`: spawns a worker task, then re-enters this
    /// extension's serialized runtime under its mutex before invoking the
    /// callback (spec.md §5 "shared resources").
    pub fn send_async(&mut self, callback: FnPtr) {
        self.tag_for_send();
        let message = self.message.clone();
        let client = self.client.clone();
        let script_state = self.script_state.clone();
        let extension_name = self.extension_name.clone();

        tokio::spawn(async move {
            let result = client.send(&message).await;
            let state = script_state.lock().await;

            let (response_arg, err_arg) = match result {
                Ok(response) => (
                    Dynamic::from(Self::wrap_response(&extension_name, response)),
                    Dynamic::UNIT,
                ),
                Err(e) => (Dynamic::UNIT, Dynamic::from(e.to_string())),
            };

            if let Err(e) = callback.call::<()>(&state.engine, &state.ast, (response_arg, err_arg)) {
                warn!(error = %e, extension = %extension_name, "send_async callback failed");
            }
        });
    }
}

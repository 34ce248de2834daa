//! The live, mutable request/response representation the bridge facades operate on.
//!
//! Kept distinct from [`super::Transaction`] (the persisted, frozen record): a
//! [`HttpMessage`] is read and rewritten in place by extension scripts across a
//! phase; the pipeline re-derives the persisted raw bytes from it once the phase
//! completes.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;

/// A request or response as scripts see and mutate it.
#[derive(Debug, Clone)]
pub struct HttpMessage {
    pub method: String,
    pub url: String,
    pub proto: String,
    pub remote_addr: String,
    pub status_code: i32,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpMessage {
    pub fn new_request(method: &str, url: &str, proto: &str, remote_addr: &str) -> Self {
        HttpMessage {
            method: method.to_string(),
            url: url.to_string(),
            proto: proto.to_string(),
            remote_addr: remote_addr.to_string(),
            status_code: -1,
            status_text: "N/A".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn new_response() -> Self {
        HttpMessage {
            method: String::new(),
            url: String::new(),
            proto: "HTTP/1.1".to_string(),
            remote_addr: String::new(),
            status_code: -1,
            status_text: "N/A".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `set_body` updates `Content-Length` (spec.md §4.9 Request/Response facades).
    pub fn set_body(&mut self, body: Bytes) {
        let len = body.len();
        self.body = body;
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            self.headers.insert(http::header::CONTENT_LENGTH, value);
        }
    }

    pub fn content_type(&self) -> String {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    /// `set_status_code(n)` also updates the status text to `"<n> <standardReason>"`
    /// (spec.md §4.9 Response facade).
    pub fn set_status_code(&mut self, code: i32) {
        self.status_code = code;
        let reason = standard_reason(code as u16);
        self.status_text = format!("{code} {reason}");
    }
}

pub fn standard_reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

pub type SharedMessage = Arc<Mutex<HttpMessage>>;

pub fn shared(message: HttpMessage) -> SharedMessage {
    Arc::new(Mutex::new(message))
}

/// Abstracts over the request's always-present message handle and the response's
/// optional one, so bridge facades (Header, Cookie, URL, Request, Response) can
/// share one set of accessors regardless of which side they wrap.
#[derive(Clone)]
pub enum MessageHandle {
    Request(Arc<Mutex<HttpMessage>>),
    Response(Arc<Mutex<Option<HttpMessage>>>),
}

impl MessageHandle {
    pub fn with<R>(&self, f: impl FnOnce(&HttpMessage) -> R) -> R {
        match self {
            MessageHandle::Request(m) => f(&m.lock()),
            MessageHandle::Response(m) => {
                let guard = m.lock();
                f(guard.as_ref().expect("response message not yet installed"))
            }
        }
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut HttpMessage) -> R) -> R {
        match self {
            MessageHandle::Request(m) => f(&mut m.lock()),
            MessageHandle::Response(m) => {
                let mut guard = m.lock();
                f(guard.as_mut().expect("response message not yet installed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_body_updates_content_length() {
        let mut msg = HttpMessage::new_request("GET", "https://example.com/", "HTTP/1.1", "");
        msg.set_body(Bytes::from_static(b"hello"));
        assert_eq!(
            msg.headers.get(http::header::CONTENT_LENGTH).unwrap(),
            "5"
        );
    }

    #[test]
    fn set_status_code_updates_status_text() {
        let mut msg = HttpMessage::new_response();
        msg.set_status_code(404);
        assert_eq!(msg.status_text, "404 Not Found");
    }
}

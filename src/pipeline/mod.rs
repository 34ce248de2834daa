//! Pipeline Coordinator (C5, spec.md §4.5): drives one transaction through scope
//! check, request-phase extensions, the optional interception pause, waypoint
//! rewrite, the outbound dial, response-phase extensions, the optional response
//! pause, and persistence.
//!
//! One `run()` call handles exactly one transaction end to end, on the task the
//! Connect Handler spawned for it (spec.md §5 "each transaction is processed on a
//! single logical task from accept to emit+persist").

use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, warn};

use crate::bridge::Url;
use crate::extensions::{ExtensionManager, Phase};
use crate::intercept::{Direction, InterceptionQueue, ReleaseAction};
use crate::persistence::Persistence;
use crate::proxy::client::{OutboundClient, SCRIPT_ORIGIN_HEADER};
use crate::scope::Scope;
use crate::transaction::message::HttpMessage;
use crate::transaction::{reserved_keys, TransactionContext};
use crate::waypoints::WaypointRouter;

/// The collaborators a pipeline run drives a transaction through; one set shared
/// across every in-flight transaction on a proxy instance (spec.md §5 "shared
/// resources").
#[derive(Clone)]
pub struct PipelineDeps {
    pub scope: Scope,
    pub extensions: Arc<tokio::sync::RwLock<ExtensionManager>>,
    pub waypoints: WaypointRouter,
    pub outbound: Arc<OutboundClient>,
    pub persistence: Arc<dyn Persistence>,
    pub intercept: InterceptionQueue,
}

/// Runs the full state machine for one transaction. Returns the response the
/// Connect Handler should write back to the client, or `None` if the connection
/// should simply be closed (the transaction was dropped before a response was
/// ever produced).
pub async fn run(
    deps: &PipelineDeps,
    ctx: TransactionContext,
    request: HttpMessage,
) -> Option<HttpMessage> {
    tag_script_origin(&ctx, &request);

    let host = request_host(&request);
    let url = request.url.clone();

    // InScopeCheck → out-of-scope → ForwardUntouched: no extension dispatch, no
    // interception, no waypoint rewrite, but the transaction still passed initial
    // parse so it still gets persisted exactly once (spec.md §8 invariant 1).
    if !deps.scope.matches(&host, &url) {
        sync_request_fields(&ctx, &request);
        persist_insert(deps, &ctx).await;

        let response = match deps.outbound.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, host = %host, "out-of-scope upstream dial failed");
                synthesize_error(502, "upstream dial failed")
            }
        };
        sync_response_fields(&ctx, &response);
        persist_update(deps, &ctx).await;
        return Some(response);
    }

    // `ctx` was constructed from the same `request` the caller is holding, so
    // `ctx.request_message()` is the live handle extensions mutate through —
    // dispatch below writes directly into it (spec.md §4.3 "explicit carry").
    deps.extensions
        .read()
        .await
        .dispatch(Phase::Request, &ctx)
        .await;

    if ctx.drop_flag() {
        // On drop at the request phase no upstream dial occurs (spec.md §4.5).
        sync_request_fields(&ctx, &ctx.request_message().lock().clone());
        persist_insert(deps, &ctx).await;
        return None;
    }

    let mut outgoing = ctx.request_message().lock().clone();

    if ctx.with_transaction(|t| t.metadata.is_intercepted()) {
        match wait_for_release(deps, Direction::Request, ctx.id()).await {
            ReleaseAction::Forward => {}
            ReleaseAction::Drop => {
                ctx.set_dropped();
                sync_request_fields(&ctx, &outgoing);
                persist_insert(deps, &ctx).await;
                return None;
            }
            ReleaseAction::Edit(bytes) => {
                if let Some(edited) = parse_raw_http_request(bytes) {
                    outgoing = edited;
                }
            }
        }
    }

    // ApplyWaypoint: rewrite the dial target after request-phase extensions ran
    // (so scripts observe the original host) but before the dial (spec.md §4.5,
    // §4.9 `set_host`).
    let authority = dial_authority(&outgoing).unwrap_or_else(|| host.clone());
    let routed = deps.waypoints.lookup(&authority);
    if routed != authority {
        rewrite_authority(&mut outgoing, &routed);
    }

    sync_request_fields(&ctx, &outgoing);
    persist_insert(deps, &ctx).await;

    let response = match deps.outbound.send(&outgoing).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, host = %host, "upstream dial failed");
            let err = synthesize_error(502, "upstream dial failed");
            ctx.install_response_message(err);
            deps.extensions
                .read()
                .await
                .dispatch(Phase::Response, &ctx)
                .await;
            let final_response = ctx
                .take_response_snapshot()
                .unwrap_or_else(|| synthesize_error(502, "upstream dial failed"));
            sync_response_fields(&ctx, &final_response);
            persist_update(deps, &ctx).await;
            return Some(final_response);
        }
    };

    ctx.install_response_message(response);
    deps.extensions
        .read()
        .await
        .dispatch(Phase::Response, &ctx)
        .await;

    if ctx.drop_flag() {
        if let Some(resp) = ctx.take_response_snapshot() {
            sync_response_fields(&ctx, &resp);
            persist_update(deps, &ctx).await;
        }
        return None;
    }

    let response = if ctx.with_transaction(|t| t.metadata.is_intercepted()) {
        match wait_for_release(deps, Direction::Response, ctx.id()).await {
            ReleaseAction::Forward => ctx
                .take_response_snapshot()
                .expect("response installed before the intercept pause"),
            ReleaseAction::Drop => {
                ctx.set_dropped();
                if let Some(resp) = ctx.take_response_snapshot() {
                    sync_response_fields(&ctx, &resp);
                    persist_update(deps, &ctx).await;
                }
                return None;
            }
            ReleaseAction::Edit(bytes) => parse_raw_http_response(bytes).unwrap_or_else(|| {
                ctx.take_response_snapshot()
                    .expect("response installed before the intercept pause")
            }),
        }
    } else {
        ctx.take_response_snapshot()
            .expect("response installed before emit")
    };

    sync_response_fields(&ctx, &response);
    persist_update(deps, &ctx).await;
    Some(response)
}

/// Carries a builder-originated request's `x-marasi-script-originated`/
/// `x-extension-id` headers (set by `RequestBuilder::tag_for_send`, spec.md
/// §4.11) into transaction metadata at intake, so extensions downstream of a
/// recursive re-entry can see which extension fired the request.
fn tag_script_origin(ctx: &TransactionContext, request: &HttpMessage) {
    let originated = request
        .headers
        .get(SCRIPT_ORIGIN_HEADER)
        .and_then(|v| v.to_str().ok())
        == Some("true");
    if !originated {
        return;
    }
    let extension_id = request
        .headers
        .get("x-extension-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    ctx.with_transaction_mut(|t| {
        t.metadata.set(reserved_keys::REQUEST_BUILDER, serde_json::Value::Bool(true));
        if let Some(extension_id) = extension_id {
            t.metadata
                .set(reserved_keys::MARASI_EXTENSION_ID, serde_json::Value::String(extension_id));
        }
    });
}

async fn wait_for_release(
    deps: &PipelineDeps,
    direction: Direction,
    id: crate::transaction::TransactionId,
) -> ReleaseAction {
    let rx = deps.intercept.enqueue(direction, id);
    rx.await.unwrap_or(ReleaseAction::Forward)
}

async fn persist_insert(deps: &PipelineDeps, ctx: &TransactionContext) {
    let snapshot = ctx.snapshot();
    if let Err(e) = deps.persistence.insert_request(&snapshot).await {
        error!(transaction_id = %snapshot.id, error = %e, "persistence insert_request failed");
    }
}

async fn persist_update(deps: &PipelineDeps, ctx: &TransactionContext) {
    let snapshot = ctx.snapshot();
    if let Err(e) = deps.persistence.update_response(&snapshot).await {
        error!(transaction_id = %snapshot.id, error = %e, "persistence update_response failed");
    }
}

fn sync_request_fields(ctx: &TransactionContext, message: &HttpMessage) {
    let host = request_host(message);
    let path = Url::parse(&message.url).path();
    let raw_request = serialize_request(message);
    ctx.with_transaction_mut(|t| {
        t.host = host;
        t.path = path;
        t.raw_request = raw_request;
    });
}

fn sync_response_fields(ctx: &TransactionContext, response: &HttpMessage) {
    let raw_response = serialize_response(response);
    let content_type = response.content_type();
    let content_length = response.body.len() as i64;
    ctx.with_transaction_mut(|t| {
        t.mark_response(raw_response, response.status_code, response.status_text.clone());
        t.content_type = content_type;
        t.content_length = content_length;
    });
}

fn request_host(message: &HttpMessage) -> String {
    message
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Url::parse(&message.url).host())
}

/// The `host:port` the outbound dial actually connects to — preferring the Host
/// header (what scripts rewrote via `set_host`) over the URL's own authority.
fn dial_authority(message: &HttpMessage) -> Option<String> {
    let host = request_host(message);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn rewrite_authority(message: &mut HttpMessage, new_authority: &str) {
    if let Ok(value) = http::HeaderValue::from_str(new_authority) {
        message.headers.insert(http::header::HOST, value);
    }
    let mut url = Url::parse(&message.url);
    url.set_host(new_authority);
    message.url = url.string();
}

fn synthesize_error(status: i32, body: &str) -> HttpMessage {
    let mut msg = HttpMessage::new_response();
    msg.set_status_code(status);
    msg.set_body(Bytes::from(body.to_string()));
    msg
}

fn serialize_request(message: &HttpMessage) -> Bytes {
    let mut head = format!("{} {} {}\r\n", message.method, message.url, message.proto);
    append_headers(&mut head, message);
    let mut out = head.into_bytes();
    out.extend_from_slice(&message.body);
    Bytes::from(out)
}

fn serialize_response(message: &HttpMessage) -> Bytes {
    let mut head = format!("{} {}\r\n", message.proto, message.status_text);
    append_headers(&mut head, message);
    let mut out = head.into_bytes();
    out.extend_from_slice(&message.body);
    Bytes::from(out)
}

fn append_headers(head: &mut String, message: &HttpMessage) {
    for (name, value) in message.headers.iter() {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(value.to_str().unwrap_or(""));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
}

/// Re-parses a buffer an operator hand-edited in the Interception Queue (spec.md
/// §4.6 `release(id, edit(bytes))`). No crate in the dependency stack offers raw
/// HTTP/1.1 buffer parsing (the wire path uses hyper's own connection parser
/// against a live socket); this is a narrow, hand-rolled parser scoped to that
/// one edit path.
fn parse_raw_http_request(bytes: Bytes) -> Option<HttpMessage> {
    let (head, body) = split_head_body(&bytes)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.splitn(3, ' ');
    let method = parts.next()?.to_string();
    let url = parts.next()?.to_string();
    let proto = parts.next().unwrap_or("HTTP/1.1").to_string();

    let mut message = HttpMessage::new_request(&method, &url, &proto, "");
    message.headers = parse_headers(lines);
    message.body = body;
    Some(message)
}

fn parse_raw_http_response(bytes: Bytes) -> Option<HttpMessage> {
    let (head, body) = split_head_body(&bytes)?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next()?;
    let mut parts = status_line.splitn(2, ' ');
    let proto = parts.next()?.to_string();
    let rest = parts.next().unwrap_or("0 Unknown");
    let status_code: i32 = rest
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let mut message = HttpMessage::new_response();
    message.proto = proto;
    message.set_status_code(status_code);
    message.headers = parse_headers(lines);
    message.body = body;
    Some(message)
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(name.trim().as_bytes()),
                http::HeaderValue::from_str(value.trim()),
            ) {
                headers.append(name, value);
            }
        }
    }
    headers
}

fn split_head_body(bytes: &Bytes) -> Option<(String, Bytes)> {
    let idx = bytes.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&bytes[..idx]).into_owned();
    let body = bytes.slice(idx + 4..);
    Some((head, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_config_dir, ConnectionPoolConfig};
    use crate::persistence::SqlitePersistence;
    use crate::transaction::Transaction;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_fixed_response_server(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    async fn deps_with(scope: Scope, waypoints: WaypointRouter) -> (PipelineDeps, Arc<dyn Persistence>) {
        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::connect(std::path::Path::new(":memory:")).await.unwrap());
        let outbound = Arc::new(OutboundClient::new(&ConnectionPoolConfig::default()));
        let extensions = ExtensionManager::load(
            persistence.clone(),
            default_config_dir(),
            scope.clone(),
            outbound.clone(),
        )
        .await
        .unwrap();
        let deps = PipelineDeps {
            scope,
            extensions: Arc::new(tokio::sync::RwLock::new(extensions)),
            waypoints,
            outbound,
            persistence: persistence.clone(),
            intercept: InterceptionQueue::new(),
        };
        (deps, persistence)
    }

    fn sample_ctx(host: &str, url: &str) -> (TransactionContext, HttpMessage) {
        let txn = Transaction::new("http", "GET", host, "/", Bytes::new());
        let mut msg = HttpMessage::new_request("GET", url, "HTTP/1.1", "127.0.0.1");
        msg.headers
            .insert(http::header::HOST, http::HeaderValue::from_str(host).unwrap());
        let ctx = TransactionContext::new(txn, msg.clone());
        (ctx, msg)
    }

    #[tokio::test]
    async fn out_of_scope_request_is_forwarded_and_persisted_without_extensions() {
        let addr = spawn_fixed_response_server("hello").await;
        let scope = Scope::new();
        scope.set_default_allow(false);
        let (deps, persistence) = deps_with(scope, WaypointRouter::new()).await;

        let host = addr.to_string();
        let url = format!("http://{host}/");
        let (ctx, msg) = sample_ctx(&host, &url);

        let response = run(&deps, ctx, msg).await.expect("response expected");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_ref(), b"hello");

        let summary = persistence.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].status_code, 200);
    }

    #[tokio::test]
    async fn drop_before_dial_persists_request_but_never_dials_upstream() {
        // Nothing is listening on this port; if the pipeline dialed it anyway the
        // run would return a synthesized 502 instead of None.
        let scope = Scope::new();
        scope.set_default_allow(true);
        let (deps, persistence) = deps_with(scope, WaypointRouter::new()).await;

        let (ctx, msg) = sample_ctx("127.0.0.1:1", "http://127.0.0.1:1/");
        ctx.set_dropped();

        let response = run(&deps, ctx.clone(), msg).await;
        assert!(response.is_none());

        let summary = persistence.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].status_code, -1);
    }

    #[tokio::test]
    async fn waypoint_override_redirects_dial_before_upstream_connects() {
        let addr = spawn_fixed_response_server("routed").await;
        let scope = Scope::new();
        scope.set_default_allow(true);
        let waypoints = WaypointRouter::new();
        waypoints.set("original.invalid", addr.to_string());
        let (deps, persistence) = deps_with(scope, waypoints).await;

        let (ctx, msg) = sample_ctx("original.invalid:9", "http://original.invalid:9/");
        let response = run(&deps, ctx, msg).await.expect("response expected");
        assert_eq!(response.body.as_ref(), b"routed");

        let summary = persistence.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
    }

    #[test]
    fn raw_request_round_trips_through_serialize_and_parse() {
        let mut msg = HttpMessage::new_request("POST", "https://example.com/x", "HTTP/1.1", "");
        msg.headers
            .insert(http::header::HOST, http::HeaderValue::from_static("example.com"));
        msg.set_body(Bytes::from_static(b"payload"));

        let raw = serialize_request(&msg);
        let parsed = parse_raw_http_request(raw).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.url, "https://example.com/x");
        assert_eq!(parsed.body.as_ref(), b"payload");
        assert_eq!(
            parsed.headers.get(http::header::HOST).unwrap(),
            "example.com"
        );
    }

    #[test]
    fn raw_response_round_trips_through_serialize_and_parse() {
        let mut msg = HttpMessage::new_response();
        msg.set_status_code(404);
        msg.set_body(Bytes::from_static(b"missing"));

        let raw = serialize_response(&msg);
        let parsed = parse_raw_http_response(raw).unwrap();
        assert_eq!(parsed.status_code, 404);
        assert_eq!(parsed.body.as_ref(), b"missing");
    }
}

//! Connect Handler (C4, spec.md §4.4): accepts client connections, tunnels
//! CONNECT targets through a per-host TLS handshake using a freshly minted leaf,
//! parses each request off the (possibly decrypted) stream, and delegates to the
//! Pipeline Coordinator (C5).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes as PlainBytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes as HyperBytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{error, info, warn};

use super::context::AppState;
use super::network::create_reusable_listener;
use super::tls::acceptor_for_leaf;
use crate::ca::warn_on_tls_failure;
use crate::error::{MarasiError, Result};
use crate::pipeline;
use crate::transaction::message::HttpMessage;
use crate::transaction::{Transaction, TransactionContext};
use crate::bridge::Url;

/// Default client-idle bound for a single connection (spec.md §5 timeouts).
const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ProxyServer {
    state: AppState,
}

impl ProxyServer {
    pub fn new(state: AppState) -> Self {
        ProxyServer { state }
    }

    /// Binds the listen address and serves connections until the process is
    /// killed; each connection runs on its own spawned task (spec.md §5 "each
    /// transaction is processed on a single logical task from accept to
    /// emit+persist").
    pub async fn run(self) -> std::result::Result<(), anyhow::Error> {
        let addr: SocketAddr = self.state.config.listen.parse().map_err(|e| {
            anyhow::anyhow!("invalid listen address '{}': {e}", self.state.config.listen)
        })?;
        let listener = create_reusable_listener(addr)?;
        info!(%addr, "marasi listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let state = self.state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                match tokio::time::timeout(
                    CLIENT_IDLE_TIMEOUT,
                    serve_client_connection(io, state, remote_addr),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(%remote_addr, error = %err, "connection error"),
                    Err(_) => warn!(%remote_addr, "client connection idle timeout"),
                }
            });
        }
    }
}

/// Serves HTTP/1.1 on the raw client socket, dispatching CONNECT to the tunnel
/// handler and everything else straight to the pipeline.
async fn serve_client_connection(
    io: TokioIo<tokio::net::TcpStream>,
    state: AppState,
    remote_addr: SocketAddr,
) -> anyhow::Result<()> {
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { handle_client_request(state, req, remote_addr).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

async fn handle_client_request(
    state: AppState,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> std::result::Result<Response<BoxBody<HyperBytes, hyper::Error>>, Infallible> {
    if req.method() == Method::CONNECT {
        Ok(handle_connect(state, req, remote_addr))
    } else {
        Ok(handle_forward_request(state, req, "http", None, remote_addr).await)
    }
}

/// Replies 200 to the CONNECT and hands the upgraded byte stream off to a
/// spawned task that performs the dynamic TLS handshake (spec.md §4.4: "C1 is
/// called lazily by C4 on TLS handshake per new SNI").
fn handle_connect(
    state: AppState,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> Response<BoxBody<HyperBytes, hyper::Error>> {
    let authority = req.uri().authority().map(|a| a.to_string());
    let Some(authority) = authority else {
        return bad_request("malformed CONNECT target");
    };
    let host = authority.split(':').next().unwrap_or(&authority).to_string();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = serve_tls_tunnel(upgraded, state, host.clone(), remote_addr).await {
                    warn!(%host, error = %e, "tls tunnel connection error");
                }
            }
            Err(e) => warn!(%host, error = %e, "CONNECT upgrade failed"),
        }
    });

    // hyper's `Response` builder has no public reason-phrase override, so this
    // serializes as "HTTP/1.1 200 OK" rather than the literal "200 Connection
    // Established" wire text some CONNECT clients expect. Status and semantics
    // match; only the reason phrase differs.
    Response::builder()
        .status(StatusCode::OK)
        .body(empty_body())
        .expect("static response is well-formed")
}

/// Mints a leaf for `host`, performs the TLS handshake on the upgraded CONNECT
/// stream, then serves decrypted HTTP/1.1 requests from it, each delegated to
/// the pipeline with `scheme = "https"` (spec.md §4.4).
async fn serve_tls_tunnel(
    upgraded: hyper::upgrade::Upgraded,
    state: AppState,
    host: String,
    remote_addr: SocketAddr,
) -> anyhow::Result<()> {
    let (cert_der, key_der) = state.ca.mint(&host).await?;
    let acceptor = acceptor_for_leaf(cert_der, key_der)?;

    let tcp_io = TokioIo::new(upgraded);
    let tls_stream = match acceptor.accept(tcp_io).await {
        Ok(stream) => stream,
        Err(e) => {
            warn_on_tls_failure(
                &host,
                &MarasiError::TlsHandshake {
                    host: host.clone(),
                    source: e,
                },
            );
            return Ok(());
        }
    };

    let io = TokioIo::new(tls_stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        let host = host.clone();
        async move {
            Ok::<_, Infallible>(
                handle_forward_request(state, req, "https", Some(host), remote_addr).await,
            )
        }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

/// Parses one request, builds its transaction, and runs the Pipeline
/// Coordinator (spec.md §4.5). `tunnel_host` is set when this request came off
/// a decrypted CONNECT tunnel, since its request line carries only the path.
async fn handle_forward_request(
    state: AppState,
    req: Request<Incoming>,
    scheme: &str,
    tunnel_host: Option<String>,
    remote_addr: SocketAddr,
) -> Response<BoxBody<HyperBytes, hyper::Error>> {
    let request = match build_request_message(req, scheme, tunnel_host.as_deref(), remote_addr).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "malformed request");
            return bad_request("malformed request");
        }
    };

    let mut parsed = Url::parse(&request.url);
    let host = parsed.host();
    let path = parsed.path();
    let txn = Transaction::new(scheme, &request.method, &host, &path, PlainBytes::new());
    let ctx = TransactionContext::new(txn, request.clone());

    match pipeline::run(&state.pipeline, ctx, request).await {
        Some(response) => message_to_response(&response),
        None => {
            // SynthesizeErrorOrClose on drop (spec.md §4.5): hyper's per-request
            // service model requires some response for an already-accepted
            // request, so this is approximated as 502 + Connection: close rather
            // than a literal response-less abort.
            let mut resp = synth_status(StatusCode::BAD_GATEWAY, "request dropped");
            resp.headers_mut().insert(
                hyper::header::CONNECTION,
                hyper::header::HeaderValue::from_static("close"),
            );
            resp
        }
    }
}

async fn build_request_message(
    req: Request<Incoming>,
    scheme: &str,
    tunnel_host: Option<&str>,
    remote_addr: SocketAddr,
) -> Result<HttpMessage> {
    let method = req.method().as_str().to_string();
    let proto = format!("{:?}", req.version());
    let headers = req.headers().clone();

    let url = if let Some(host) = tunnel_host {
        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        format!("{scheme}://{host}{path}")
    } else if req.uri().authority().is_some() {
        req.uri().to_string()
    } else {
        let host = headers
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let path = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        format!("{scheme}://{host}{path}")
    };

    let collected = req
        .into_body()
        .collect()
        .await
        .map_err(|e| MarasiError::ClientIo(e.to_string()))?;
    let body = collected.to_bytes();

    let mut msg = HttpMessage::new_request(&method, &url, &proto, &remote_addr.to_string());
    msg.headers = headers;
    msg.body = PlainBytes::from(body.to_vec());
    Ok(msg)
}

fn message_to_response(msg: &HttpMessage) -> Response<BoxBody<HyperBytes, hyper::Error>> {
    let status =
        StatusCode::from_u16(msg.status_code.max(0) as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in msg.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(full_body(HyperBytes::copy_from_slice(&msg.body)))
        .unwrap_or_else(|_| synth_status(StatusCode::INTERNAL_SERVER_ERROR, "malformed response headers"))
}

fn bad_request(message: &str) -> Response<BoxBody<HyperBytes, hyper::Error>> {
    synth_status(StatusCode::BAD_REQUEST, message)
}

fn synth_status(status: StatusCode, message: &str) -> Response<BoxBody<HyperBytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(full_body(HyperBytes::copy_from_slice(message.as_bytes())))
        .expect("static response is well-formed")
}

fn full_body(bytes: HyperBytes) -> BoxBody<HyperBytes, hyper::Error> {
    Full::new(bytes)
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn empty_body() -> BoxBody<HyperBytes, hyper::Error> {
    Empty::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn spawn_fixed_response_server(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        addr
    }

    async fn bootstrap_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::default();
        config.config_dir = dir.path().to_path_buf();
        config.scope_default_allow = true;
        let state = AppState::bootstrap(config).await.unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn plain_forward_request_reaches_upstream_through_pipeline() {
        let upstream_addr = spawn_fixed_response_server("hello from upstream").await;
        let (state, _dir) = bootstrap_state().await;

        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, remote_addr) = client_listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let _ = serve_client_connection(io, state, remote_addr).await;
        });

        let mut client = TcpStream::connect(client_addr).await.unwrap();
        let request = format!(
            "GET http://{upstream_addr}/ HTTP/1.1\r\nHost: {upstream_addr}\r\nConnection: close\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("hello from upstream"));
    }

    #[test]
    fn message_to_response_preserves_status_and_body() {
        let mut msg = HttpMessage::new_response();
        msg.set_status_code(404);
        msg.set_body(PlainBytes::from_static(b"not found"));
        let response = message_to_response(&msg);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

//! Outbound Client (C11, spec.md §4.11): connection pool keyed by scheme+host:port,
//! HTTP/1.1 only. Dial failures are translated to 502 by the pipeline; requests
//! carry a header tagging them as script- or pipeline-originated.

use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes as HyperBytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::warn;

use crate::config::ConnectionPoolConfig;
use crate::error::{MarasiError, Result};
use crate::transaction::message::HttpMessage;

/// Header marking a request as pipeline- or script-originated so recursive
/// re-entry into the proxy can be tagged (spec.md §4.11).
pub const SCRIPT_ORIGIN_HEADER: &str = "x-marasi-script-originated";

pub type HyperClient = Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    BoxBody<HyperBytes, hyper::Error>,
>;

#[derive(Clone)]
pub struct OutboundClient {
    client: HyperClient,
}

impl OutboundClient {
    pub fn new(pool: &ConnectionPoolConfig) -> Self {
        let mut http_connector = hyper_util::client::legacy::connect::HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("failed to load native root certificates")
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build(https_connector);

        OutboundClient { client }
    }

    /// Sends `message` upstream and returns the response as an [`HttpMessage`].
    /// Dial/transport failures are reported as [`MarasiError::UpstreamIo`]; the
    /// pipeline translates that to a synthesized 502 (spec.md §4.11, §7).
    pub async fn send(&self, message: &HttpMessage) -> Result<HttpMessage> {
        let mut builder = hyper::Request::builder()
            .method(message.method.as_str())
            .uri(message.url.as_str());

        for (name, value) in message.headers.iter() {
            builder = builder.header(name, value);
        }

        let request = builder
            .body(
                Full::new(HyperBytes::copy_from_slice(&message.body))
                    .map_err(|never| match never {})
                    .boxed(),
            )
            .map_err(|e| MarasiError::UpstreamIo(e.to_string()))?;

        let response = self.client.request(request).await.map_err(|e| {
            warn!(error = %e, url = %message.url, "outbound dial failed");
            MarasiError::UpstreamIo(e.to_string())
        })?;

        let status_code = response.status().as_u16() as i32;
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| MarasiError::UpstreamIo(e.to_string()))?
            .to_bytes();

        let mut reply = HttpMessage::new_response();
        reply.headers = headers;
        reply.set_status_code(status_code);
        reply.body = bytes::Bytes::from(body_bytes.to_vec());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_with_configured_pool_settings() {
        let pool = ConnectionPoolConfig {
            max_idle_per_host: 4,
            idle_timeout_secs: 30,
            keepalive_timeout_secs: 15,
            connect_timeout_secs: 5,
        };
        let _client = OutboundClient::new(&pool);
    }
}

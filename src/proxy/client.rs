//! Outbound upstream HTTP client with a fixed timeout contract. HTTP/2 is
//! disabled and redirects are never followed: 3xx responses are surfaced to
//! the original client verbatim.

use http_body_util::combinators::BoxBody;
use http::Uri;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_service::Service;

pub type UpstreamBody = BoxBody<Bytes, Infallible>;
type BoxError = Box<dyn StdError + Send + Sync>;
pub type UpstreamClient = Client<TimeoutConnector<hyper_rustls::HttpsConnector<HttpConnector>>, UpstreamBody>;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
// hyper-rustls folds the TCP dial and the TLS handshake into one connect()
// call with no hook in between, so the two budgets are enforced as a single
// deadline over both rather than the handshake alone.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(DIAL_TIMEOUT.as_secs() + HANDSHAKE_TIMEOUT.as_secs());
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_IDLE_CONNS: usize = 1024;

/// Wraps a connector with a single deadline over the whole `connect()` call.
///
/// There is no separate expect-continue timeout here: the forwarder in
/// `handler.rs` always reads a request's body to completion before dialing
/// upstream, so a 100-continue round trip never happens on this path and
/// there is nothing to bound.
#[derive(Clone)]
pub struct TimeoutConnector<C> {
    inner: C,
    timeout: Duration,
}

impl<C> Service<Uri> for TimeoutConnector<C>
where
    C: Service<Uri> + Send + 'static,
    C::Response: Send + 'static,
    C::Error: Into<BoxError> + Send,
    C::Future: Send,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connecting = self.inner.call(uri);
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(format!("connect timed out after {timeout:?}").into()),
            }
        })
    }
}

pub fn build() -> UpstreamClient {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(DIAL_TIMEOUT));
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    let connector = TimeoutConnector {
        inner: https,
        timeout: CONNECT_TIMEOUT,
    };

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(IDLE_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNS)
        .build(connector)
}

/// Builds the same client, trusting `roots` instead of the public web PKI.
/// Used by tests to stand up an upstream signed by a private test CA.
pub fn build_with_roots(roots: rustls::RootCertStore) -> UpstreamClient {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(DIAL_TIMEOUT));
    http.enforce_http(false);

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    let connector = TimeoutConnector {
        inner: https,
        timeout: CONNECT_TIMEOUT,
    };

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(IDLE_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNS)
        .build(connector)
}

//! The interception engine: owns the plain listener, the injectable TLS
//! listener, the outbound client, and ties CONNECT, sniffing, and request
//! forwarding together.

pub mod client;
mod connect;
mod handler;
mod wire;

use crate::inspector::Inspector;
use crate::issuer::Issuer;
use crate::net::InjectableListener;
use bytes::BytesMut;
use connect::TunneledConn;
use http::{HeaderMap, Method, Uri};
use rustls::server::Acceptor;
use rustls::ServerConfig;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub struct Proxy {
    issuer: Arc<dyn Issuer>,
    inspector: Arc<dyn Inspector>,
    client: client::UpstreamClient,
}

impl Proxy {
    pub fn new(issuer: Arc<dyn Issuer>, inspector: Arc<dyn Inspector>) -> Self {
        Self {
            issuer,
            inspector,
            client: client::build(),
        }
    }

    /// Constructs a proxy over a caller-supplied outbound client, e.g. one
    /// trusting a test CA instead of the public web PKI.
    pub fn with_client(
        issuer: Arc<dyn Issuer>,
        inspector: Arc<dyn Inspector>,
        client: client::UpstreamClient,
    ) -> Self {
        Self {
            issuer,
            inspector,
            client,
        }
    }

    /// Binds `addr` and runs the plain and TLS server loops concurrently.
    /// Returns only if one of the two listeners fails to accept.
    pub async fn run(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "proxy listening");
        self.serve(listener).await
    }

    /// Like [`run`](Self::run), but over an already-bound listener. Lets
    /// callers (tests, primarily) learn the ephemeral port before serving.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let mut tls_listener: InjectableListener<TunneledConn> = InjectableListener::new();
        let tls_handle = tls_listener.handle();

        let tls_proxy = self.clone();
        let tls_task = tokio::spawn(async move {
            while let Some(conn) = tls_listener.accept().await {
                let proxy = tls_proxy.clone();
                tokio::spawn(async move { proxy.serve_tls(conn).await });
            }
        });

        let plain_proxy = self;
        let plain_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let proxy = plain_proxy.clone();
                        let tls_handle = tls_handle.clone();
                        tokio::spawn(async move {
                            proxy.serve_plain(stream, peer.to_string(), tls_handle).await
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });

        tokio::select! {
            r = plain_task => r?,
            r = tls_task => r?,
        }
        Ok(())
    }

    /// Serves one plain TCP connection: absolute-form requests are
    /// forwarded with keep-alive; a CONNECT request hands the raw socket
    /// off to the tunnel handler and ends this loop.
    async fn serve_plain(
        &self,
        mut stream: TcpStream,
        remote: String,
        tls_handle: crate::net::InjectableListenerHandle<TunneledConn>,
    ) {
        let mut buf = BytesMut::new();
        loop {
            let head = match wire::read_head(&mut stream, &mut buf).await {
                Ok(Some(head)) => head,
                Ok(None) => return,
                Err(e) => {
                    debug!(error = %e, "connection closed reading request");
                    return;
                }
            };

            if head.method == Method::CONNECT {
                let target = head.uri.to_string();
                connect::handle(stream, target, remote, tls_handle).await;
                return;
            }

            let body = match wire::read_body(&mut stream, &mut buf, &head.headers).await {
                Ok(b) => b,
                Err(e) => {
                    debug!(error = %e, "connection closed reading body");
                    return;
                }
            };

            let keep_alive = is_keep_alive(head.version, &head.headers);
            let response = handler::forward(
                &self.client,
                self.inspector.as_ref(),
                head.method,
                head.uri,
                head.headers,
                body,
                &remote,
            )
            .await;

            if wire::write_response(&mut stream, response.status, &response.headers, &response.body)
                .await
                .is_err()
            {
                return;
            }
            if !keep_alive {
                return;
            }
        }
    }

    /// Accepts a TLS handshake on a tunneled connection and serves exactly
    /// one decrypted request, rewriting it to absolute-form first.
    async fn serve_tls(&self, conn: TunneledConn) {
        let remote = conn.remote_addr().to_string();
        let host = conn.host().to_string();

        let acceptor = tokio_rustls::LazyConfigAcceptor::new(Acceptor::default(), conn);
        tokio::pin!(acceptor);

        let start = match acceptor.as_mut().await {
            Ok(start) => start,
            Err(e) => {
                debug!(error = %e, "tls sniff handshake failed");
                return;
            }
        };

        let sni = match start.client_hello().server_name() {
            Some(name) => name.to_string(),
            None => {
                warn!("tls client hello without sni, refusing handshake");
                return;
            }
        };

        let leaf = match self.issuer.issue(&sni).await {
            Ok(leaf) => leaf,
            Err(e) => {
                debug!(hostname = %sni, error = %e, "certificate issuance failed");
                return;
            }
        };

        let config = match build_server_config(&leaf) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to build tls server config");
                return;
            }
        };

        let mut tls_stream = match start.into_stream(Arc::new(config)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "tls handshake failed");
                return;
            }
        };

        let mut buf = BytesMut::new();
        let head = match wire::read_head(&mut tls_stream, &mut buf).await {
            Ok(Some(head)) => head,
            _ => return,
        };
        let body = match wire::read_body(&mut tls_stream, &mut buf, &head.headers).await {
            Ok(b) => b,
            Err(_) => return,
        };

        let uri = rewrite_absolute(head.uri, &host);
        let response = handler::forward(
            &self.client,
            self.inspector.as_ref(),
            head.method,
            uri,
            head.headers,
            body,
            &remote,
        )
        .await;

        let _ = wire::write_response(&mut tls_stream, response.status, &response.headers, &response.body)
            .await;
        let _ = tls_stream.shutdown().await;
    }
}

fn build_server_config(leaf: &crate::issuer::LeafCert) -> anyhow::Result<ServerConfig> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(leaf.chain.clone(), leaf.key_der())?;
    Ok(config)
}

/// Requests intercepted off a TLS tunnel carry a relative request line (no
/// scheme, no host); rewrite to absolute-form so the shared handler can
/// treat it identically to a proxy-aware client's request.
fn rewrite_absolute(uri: Uri, host: &str) -> Uri {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri;
    }
    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    format!("https://{host}{path_and_query}")
        .parse()
        .unwrap_or(uri)
}

fn is_keep_alive(version: http::Version, headers: &HeaderMap) -> bool {
    let connection = headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if connection.contains("close") {
        return false;
    }
    if connection.contains("keep-alive") {
        return true;
    }
    version == http::Version::HTTP_11
}

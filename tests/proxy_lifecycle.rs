use std::sync::Arc;

use connect_mitm::inspector::ForbidReceivePack;
use connect_mitm::issuer::{CaIssuer, Issuer};
use connect_mitm::proxy::{client, Proxy};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, IsCa, BasicConstraints, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn generate_test_ca() -> (String, String, rustls::pki_types::CertificateDer<'static>) {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Test CA");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let der = cert.der().clone();
    (cert.pem(), key_pair.serialize_pem(), der)
}

async fn available_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Runs a minimal TLS-terminating upstream that always answers `GET /ok`
/// with 200 and `GET /redirect` with a 302, ignoring everything else it
/// can't recognize in the (deliberately tiny) hand-rolled request read.
async fn run_upstream(listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let mut tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(_) => return,
            };
            let mut buf = [0u8; 4096];
            let n = tls.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);

            let response = if request.contains("/redirect") {
                "HTTP/1.1 302 Found\r\nLocation: https://elsewhere/\r\ncontent-length: 0\r\n\r\n"
                    .to_string()
            } else {
                "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK".to_string()
            };
            let _ = tls.write_all(response.as_bytes()).await;
            let _ = tls.shutdown().await;
        });
    }
}

struct Harness {
    proxy_addr: std::net::SocketAddr,
    upstream_addr: std::net::SocketAddr,
    client_tls_config: Arc<ClientConfig>,
}

async fn start_harness() -> Harness {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let dir = tempfile::tempdir().unwrap();
    let (ca_cert_pem, ca_key_pem, ca_der) = generate_test_ca();
    let ca_cert_path = dir.path().join("ca.pem");
    let ca_key_path = dir.path().join("ca.key");
    std::fs::write(&ca_cert_path, &ca_cert_pem).unwrap();
    std::fs::write(&ca_key_path, &ca_key_pem).unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(ca_der).unwrap();

    // Upstream: a bare TLS server whose certificate is minted by the same
    // test CA, for the IP literal the outbound client will actually dial.
    let upstream_issuer = CaIssuer::load(&ca_cert_path, &ca_key_path).unwrap();
    let upstream_leaf = upstream_issuer.issue("127.0.0.1").await.unwrap();
    let upstream_listener = available_listener().await;
    let upstream_addr = upstream_listener.local_addr().unwrap();
    let upstream_tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(upstream_leaf.chain.clone(), upstream_leaf.key_der())
        .unwrap();
    tokio::spawn(run_upstream(
        upstream_listener,
        TlsAcceptor::from(Arc::new(upstream_tls_config)),
    ));

    // Proxy: trusts the same test CA for its outbound client, and mints
    // interception leaves from it too.
    let proxy_issuer = Arc::new(CaIssuer::load(&ca_cert_path, &ca_key_path).unwrap());
    let outbound_client = client::build_with_roots(roots.clone());
    let proxy = Arc::new(Proxy::with_client(
        proxy_issuer,
        Arc::new(ForbidReceivePack),
        outbound_client,
    ));
    let proxy_listener = available_listener().await;
    let proxy_addr = proxy_listener.local_addr().unwrap();
    tokio::spawn(proxy.serve(proxy_listener));

    let client_tls_config = Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    );

    Harness {
        proxy_addr,
        upstream_addr,
        client_tls_config,
    }
}

async fn connect_tunnel(proxy_addr: std::net::SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream
        .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(
        &buf[..n],
        b"HTTP/1.1 200 Connection Established\r\n\r\n",
        "CONNECT response must be byte-exact"
    );
    stream
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tls_intercepted_request_reaches_upstream_and_returns_ok() {
    let harness = start_harness().await;
    let tunnel = connect_tunnel(harness.proxy_addr, &harness.upstream_addr.to_string()).await;

    let connector = TlsConnector::from(harness.client_tls_config.clone());
    let server_name = ServerName::try_from("example.com").unwrap();
    let mut tls = connector.connect(server_name, tunnel).await.unwrap();

    tls.write_all(b"GET /ok HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    tls.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("OK"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redirect_passes_through_verbatim() {
    let harness = start_harness().await;
    let tunnel = connect_tunnel(harness.proxy_addr, &harness.upstream_addr.to_string()).await;

    let connector = TlsConnector::from(harness.client_tls_config.clone());
    let server_name = ServerName::try_from("example.com").unwrap();
    let mut tls = connector.connect(server_name, tunnel).await.unwrap();

    tls.write_all(b"GET /redirect HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    tls.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 302 Found"));
    assert!(response.contains("Location: https://elsewhere/") || response.contains("location: https://elsewhere/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_tls_tunnel_is_spliced_blindly_to_declared_host() {
    let harness = start_harness().await;

    let echo_listener = available_listener().await;
    let echo_addr = echo_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = echo_listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(&buf[..n]).await.unwrap();
    });

    let mut tunnel = connect_tunnel(harness.proxy_addr, &echo_addr.to_string()).await;
    tunnel.write_all(b"PING\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = tunnel.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"PING\n");
}

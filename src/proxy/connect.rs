//! CONNECT tunnel handling: hijack, protocol sniffing, and bidirectional splice.

use crate::error::ProxyError;
use crate::net::{HttpAddr, InjectableListenerHandle, PeekableConn, PeerAddr};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

const DUPLEX_BUFFER: usize = 8192;

pub type TunneledConn = PeekableConn<DuplexStream>;

/// Handles one CONNECT request on an already-hijacked raw socket: spawns the
/// sniffer, writes the literal "200 Connection Established" response, then
/// splices the client socket to the sniffer's pipe endpoint.
pub async fn handle(
    mut raw: TcpStream,
    target_host: String,
    remote_addr: String,
    tls_handle: InjectableListenerHandle<TunneledConn>,
) {
    let (client_side, server_side) = tokio::io::duplex(DUPLEX_BUFFER);
    let peekable = PeekableConn::new(
        server_side,
        PeerAddr::Http(HttpAddr(remote_addr)),
        target_host,
    );
    tokio::spawn(unwrap(peekable, tls_handle));

    if let Err(e) = raw
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
    {
        let error = ProxyError::HijackFailed;
        debug!(%error, io_error = %e, "connect acknowledgement failed");
        return;
    }

    communicate(client_side, raw).await;
}

/// Peeks the first three bytes of a tunneled stream and routes it: a TLS
/// ClientHello record is pushed into the injectable listener for the TLS
/// server to handshake; anything else is tunneled blindly to the declared host.
async fn unwrap(mut conn: TunneledConn, tls_handle: InjectableListenerHandle<TunneledConn>) {
    let prefix = match conn.peek(3).await {
        Ok(b) if b.len() == 3 => [b[0], b[1], b[2]],
        _ => {
            debug!("sniff failed, closing tunnel silently");
            return;
        }
    };

    if prefix[0] == 0x16 && prefix[1] == 0x03 && prefix[2] <= 0x03 {
        tls_handle.push(conn);
        return;
    }

    let host = conn.host().to_string();
    match TcpStream::connect(&host).await {
        Ok(upstream) => communicate(conn, upstream).await,
        Err(e) => debug!(%host, error = %e, "plain tunnel dial failed"),
    }
}

/// Bidirectional splice with half-close: each direction copies until EOF or
/// error, then shuts down the write half of its destination. Returns as soon
/// as either direction reports an error, or once both report clean completion.
pub async fn communicate<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let (tx, mut rx) = mpsc::channel(2);
    tokio::spawn(forward(ar, bw, tx.clone()));
    tokio::spawn(forward(br, aw, tx));

    for _ in 0..2 {
        match rx.recv().await {
            Some(Ok(())) => continue,
            _ => return,
        }
    }
}

async fn forward<R, W>(mut r: R, mut w: W, tx: mpsc::Sender<io::Result<()>>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = match tokio::io::copy(&mut r, &mut w).await {
        Ok(_) => w.shutdown().await,
        Err(e) => Err(e),
    };
    let _ = tx.send(result).await;
}

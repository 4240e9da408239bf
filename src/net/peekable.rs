use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A synthetic peer address for connections that arrive over a CONNECT
/// tunnel rather than a real socket (`Network()=="http"` in the original).
#[derive(Clone, Debug)]
pub struct HttpAddr(pub String);

impl std::fmt::Display for HttpAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub enum PeerAddr {
    Socket(SocketAddr),
    Http(HttpAddr),
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddr::Socket(a) => write!(f, "{a}"),
            PeerAddr::Http(a) => write!(f, "{a}"),
        }
    }
}

/// Wraps a byte stream with a persistent, non-consuming peek buffer.
///
/// Unlike `tokio::io::BufReader`, repeated `peek` calls keep returning the
/// same unconsumed bytes until a `read` actually advances past them.
pub struct PeekableConn<S> {
    inner: S,
    peeked: BytesMut,
    addr: PeerAddr,
    host: String,
}

impl<S: AsyncRead + Unpin> PeekableConn<S> {
    pub fn new(inner: S, addr: PeerAddr, host: String) -> Self {
        Self {
            inner,
            peeked: BytesMut::new(),
            addr,
            host,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn remote_addr(&self) -> &PeerAddr {
        &self.addr
    }

    /// Returns the next `n` bytes without consuming them. Reads from the
    /// underlying stream only as needed to reach `n` buffered bytes.
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.peeked.len() < n {
            let mut chunk = [0u8; 4096];
            let read = tokio::io::AsyncReadExt::read(&mut self.inner, &mut chunk).await?;
            if read == 0 {
                break;
            }
            self.peeked.extend_from_slice(&chunk[..read]);
        }
        let len = n.min(self.peeked.len());
        Ok(&self.peeked[..len])
    }

    pub fn into_inner(self) -> (S, BytesMut) {
        (self.inner, self.peeked)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.peeked.is_empty() {
            let take = buf.remaining().min(self.peeked.len());
            let chunk = self.peeked.split_to(take);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableConn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

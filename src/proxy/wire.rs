//! Minimal hand-rolled HTTP/1.1 head parsing and response writing.
//!
//! CONNECT handling needs byte-exact control over the "200 Connection
//! Established" response, which rules out handing the raw socket to a
//! generic HTTP server implementation; the same front door is used for
//! absolute-form requests so both paths share one connection-reading loop.

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEAD_SIZE: usize = 64 * 1024;

pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Reads one request head from `stream`, using and replenishing `buf` as
/// scratch space. Leftover bytes after the head (start of the body, or the
/// next pipelined request) remain in `buf` for the caller. Returns `Ok(None)`
/// if the connection closed before any bytes arrived.
pub async fn read_head<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> io::Result<Option<RequestHead>> {
    loop {
        if let Some((head, consumed)) = try_parse(buf)? {
            buf.advance(consumed);
            return Ok(Some(head));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-request"))
            };
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn try_parse(buf: &BytesMut) -> io::Result<Option<(RequestHead, usize)>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut raw_headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => {
            let method = Method::from_bytes(req.method.unwrap_or("").as_bytes())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "unsupported method"))?;
            let uri: Uri = req
                .path
                .unwrap_or("")
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed request target"))?;
            let version = if req.version == Some(1) {
                Version::HTTP_11
            } else {
                Version::HTTP_10
            };

            let mut headers = HeaderMap::new();
            for h in req.headers.iter() {
                let name = HeaderName::from_bytes(h.name.as_bytes())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed header name"))?;
                let value = HeaderValue::from_bytes(h.value)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed header value"))?;
                headers.append(name, value);
            }

            Ok(Some((
                RequestHead {
                    method,
                    uri,
                    version,
                    headers,
                },
                consumed,
            )))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
    }
}

/// Reads the request body per `Content-Length` or chunked `Transfer-Encoding`.
/// Bodies without either are treated as empty, matching proxy requests which
/// never rely on close-delimited framing.
pub async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
    headers: &HeaderMap,
) -> io::Result<Bytes> {
    let chunked = headers
        .get(http::header::TRANSFER_ENCODING)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false);

    if chunked {
        return read_chunked(stream, buf).await;
    }

    let len = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < len {
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body truncated"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf.split_to(len).freeze())
}

async fn read_chunked<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> io::Result<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let line = read_line(stream, buf).await?;
        let size_str = line
            .split(|&b| b == b';')
            .next()
            .and_then(|s| std::str::from_utf8(s).ok())
            .unwrap_or("")
            .trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed chunk size"))?;

        if size == 0 {
            loop {
                let trailer = read_line(stream, buf).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            break;
        }

        while buf.len() < size + 2 {
            let mut chunk = [0u8; 8192];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "chunked body truncated"));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        body.extend_from_slice(&buf[..size]);
        buf.advance(size + 2);
    }
    Ok(body.freeze())
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut) -> io::Result<Vec<u8>> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos).to_vec();
            buf.advance(2);
            return Ok(line);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Writes a full status line, headers, and body. Adds `content-length` when
/// the caller's header set doesn't already carry one.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    headers: &HeaderMap,
    body: &[u8],
) -> io::Result<()> {
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("");

    let mut out = format!("HTTP/1.1 {status} {reason}\r\n").into_bytes();
    let mut has_content_length = false;
    for (name, value) in headers.iter() {
        if name == http::header::CONTENT_LENGTH {
            has_content_length = true;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !has_content_length {
        out.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    writer.write_all(&out).await
}

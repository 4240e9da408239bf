//! Shared request-handling path: absolute-form proxy requests and decrypted
//! TLS-reinjected requests both funnel through here after rewriting.

use super::client::{UpstreamBody, UpstreamClient};
use crate::error::ProxyError;
use crate::inspector::Inspector;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use tracing::debug;

pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    fn status_only(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Forwards one proxy request upstream, applying the inspector first.
///
/// `uri` must already be in absolute-form (scheme + authority); the TLS
/// server rewrites relative request lines before calling this.
pub async fn forward(
    client: &UpstreamClient,
    inspector: &dyn Inspector,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote: &str,
) -> Response {
    if uri.scheme().is_none() || uri.authority().is_none() {
        let error = ProxyError::NotAbsolute;
        debug!(%error, "rejecting request");
        return Response::status_only(error.status());
    }

    let status = inspector.inspect(&method, &uri, remote);
    if status != 0 {
        return Response::status_only(status);
    }

    let body: UpstreamBody = Full::new(body).map_err(|e: Infallible| match e {}).boxed();
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(map) = builder.headers_mut() {
        *map = headers;
    }
    let request = match builder.body(body) {
        Ok(r) => r,
        Err(_) => return Response::status_only(502),
    };

    let upstream = match client.request(request).await {
        Ok(r) => r,
        Err(e) => {
            let error = ProxyError::from(e);
            debug!(%error, "upstream request failed");
            return Response::status_only(error.status());
        }
    };

    let status = upstream.status().as_u16();
    let mut headers = upstream.headers().clone();
    let body = match upstream.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    strip_hop_by_hop(&mut headers);

    Response {
        status,
        headers,
        body,
    }
}

/// Removes connection-scoped headers that don't survive re-framing: the
/// body has already been fully collected off the wire here, so a
/// `transfer-encoding: chunked` from upstream would otherwise be copied
/// onto a response whose body is no longer chunk-encoded.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [
        http::header::CONNECTION,
        http::header::TRANSFER_ENCODING,
        http::header::TE,
        http::header::TRAILER,
        http::header::UPGRADE,
        http::header::PROXY_AUTHENTICATE,
        http::header::PROXY_AUTHORIZATION,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_but_keeps_entity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(http::header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(http::header::CONTENT_TYPE, "text/plain".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(http::header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(http::header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), "text/plain");
    }
}

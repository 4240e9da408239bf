//! Request inspection: a policy hook consulted before every proxied request.

use http::{Method, Uri};
use tracing::info;

/// Inspects a proxied request and decides whether it may proceed.
///
/// Returns `0` to allow the request through unchanged, or a non-zero HTTP
/// status to reject it with that status instead of forwarding upstream.
pub trait Inspector: Send + Sync {
    fn inspect(&self, method: &Method, uri: &Uri, remote: &str) -> u16;
}

/// Rejects `git-receive-pack` pushes, the default policy for a read-only
/// git mirror: everything else passes through.
pub struct ForbidReceivePack;

impl Inspector for ForbidReceivePack {
    fn inspect(&self, method: &Method, uri: &Uri, remote: &str) -> u16 {
        if uri.path().ends_with("/git-receive-pack") {
            info!(%remote, %method, %uri, "denied");
            403
        } else {
            info!(%remote, %method, %uri, "allowed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_receive_pack_path() {
        let inspector = ForbidReceivePack;
        let uri: Uri = "/repo.git/git-receive-pack".parse().unwrap();
        assert_eq!(inspector.inspect(&Method::POST, &uri, "127.0.0.1"), 403);
    }

    #[test]
    fn allows_upload_pack_path() {
        let inspector = ForbidReceivePack;
        let uri: Uri = "/repo.git/git-upload-pack".parse().unwrap();
        assert_eq!(inspector.inspect(&Method::POST, &uri, "127.0.0.1"), 0);
    }

    #[test]
    fn allows_unrelated_paths() {
        let inspector = ForbidReceivePack;
        let uri: Uri = "/repo.git/info/refs".parse().unwrap();
        assert_eq!(inspector.inspect(&Method::GET, &uri, "127.0.0.1"), 0);
    }
}

//! Certificate issuance: a single-operation trait plus the freshness and
//! single-flight discipline shared by both concrete issuers.

mod ca;
mod loader;

pub use ca::CaIssuer;
pub use loader::PreIssuedLoader;

use crate::cache::Cache;
use crate::error::IssuerError;
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// A leaf certificate chain and key, shareable across concurrent TLS handshakes.
#[derive(Clone)]
pub struct LeafCert {
    /// DER chain: leaf first, then any intermediates (never the self-signed root).
    pub chain: Vec<CertificateDer<'static>>,
    pub key: Arc<PrivateKeyDer<'static>>,
    pub not_after: OffsetDateTime,
}

impl LeafCert {
    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }

    fn is_fresh(&self) -> bool {
        self.not_after > OffsetDateTime::now_utc() + Duration::minutes(1)
    }
}

/// Issues leaf certificates on demand, keyed by hostname.
#[async_trait::async_trait]
pub trait Issuer: Send + Sync {
    async fn issue(&self, hostname: &str) -> Result<LeafCert, IssuerError>;
}

type MintFuture = Pin<Box<dyn Future<Output = Result<LeafCert, IssuerError>> + Send>>;

/// Shared cache + in-flight coalescing for issuers that mint or load on miss.
///
/// Concurrent calls for the same hostname share one underlying `produce`
/// future (a `futures::future::Shared`), so exactly one mint/load runs and
/// every waiter observes the same result or the same error.
pub(crate) struct SingleFlight {
    cache: Cache<LeafCert>,
    inflight: DashMap<String, Shared<MintFuture>>,
}

impl SingleFlight {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity),
            inflight: DashMap::new(),
        }
    }

    /// Returns the cached, fresh leaf for `hostname`, or coalesces concurrent
    /// callers onto a single invocation of `produce` and caches its success.
    pub(crate) async fn get_or_produce<F, Fut>(
        &self,
        hostname: &str,
        produce: F,
    ) -> Result<LeafCert, IssuerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LeafCert, IssuerError>> + Send + 'static,
    {
        if let Some(cached) = self.cache.get(hostname) {
            if cached.is_fresh() {
                return Ok(cached);
            }
        }

        // Either take the in-flight future another caller already started, or
        // register our own. `entry()` holds the shard lock across the
        // check-and-insert so two first-time callers can't each win and
        // start their own production run for the same hostname. The entry
        // is removed once the future resolves so a later near-expiry call
        // starts a fresh production run.
        let shared = self
            .inflight
            .entry(hostname.to_string())
            .or_insert_with(|| {
                let fut: MintFuture = Box::pin(produce());
                fut.shared()
            })
            .clone();

        let result = shared.await;
        self.inflight.remove(hostname);

        if let Ok(leaf) = &result {
            self.cache.add(hostname, leaf.clone());
        }
        result
    }
}

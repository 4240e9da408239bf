use super::{Issuer, LeafCert, SingleFlight};
use crate::error::IssuerError;
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

const MAX_CACHED_LEAVES: usize = 256;

/// Serves leaf certificates pre-issued out of band, one directory per hostname.
///
/// Expects `<dir>/<hostname>/cert.pem` and `<dir>/<hostname>/key.pem`.
pub struct PreIssuedLoader {
    dir: PathBuf,
    flight: SingleFlight,
}

impl PreIssuedLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            flight: SingleFlight::new(MAX_CACHED_LEAVES),
        }
    }

    fn load(dir: &Path, hostname: &str) -> Result<LeafCert, IssuerError> {
        let host_dir = dir.join(hostname);
        let cert_path = host_dir.join("cert.pem");
        let key_path = host_dir.join("key.pem");

        let cert_pem = std::fs::read(&cert_path)
            .map_err(|_| IssuerError::NotFound(hostname.to_string()))?;
        let key_pem = std::fs::read(&key_path)
            .map_err(|_| IssuerError::NotFound(hostname.to_string()))?;

        let chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut cert_pem.as_slice())
                .collect::<Result<_, _>>()
                .map_err(|e| IssuerError::Load(hostname.to_string(), e.to_string()))?;
        if chain.is_empty() {
            return Err(IssuerError::ParseFailure(format!(
                "no certificates found in {}",
                cert_path.display()
            )));
        }

        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| IssuerError::Load(hostname.to_string(), e.to_string()))?
            .ok_or_else(|| {
                IssuerError::ParseFailure(format!("no private key found in {}", key_path.display()))
            })?;

        let (_, parsed) = x509_parser::parse_x509_certificate(&chain[0])
            .map_err(|e| IssuerError::ParseFailure(e.to_string()))?;
        let not_after = OffsetDateTime::from_unix_timestamp(parsed.validity().not_after.timestamp())
            .map_err(|e| IssuerError::ParseFailure(e.to_string()))?;

        Ok(LeafCert {
            chain,
            key: Arc::new(key),
            not_after,
        })
    }
}

#[async_trait::async_trait]
impl Issuer for PreIssuedLoader {
    async fn issue(&self, hostname: &str) -> Result<LeafCert, IssuerError> {
        let dir = self.dir.clone();
        let hostname_owned = hostname.to_string();
        self.flight
            .get_or_produce(hostname, move || async move {
                Self::load(&dir, &hostname_owned)
            })
            .await
    }
}

use super::{Issuer, LeafCert, SingleFlight};
use crate::error::{ConfigError, IssuerError};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const MAX_CACHED_LEAVES: usize = 256;

/// Mints leaf certificates on demand, signed by a CA loaded from PEM files.
pub struct CaIssuer {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
    /// Intermediates between the leaf and the self-signed root, exclusive of
    /// the root itself. `from_ca_cert_pem` only ever parses a single PEM
    /// block, so the loaded CA is always exactly that root and this is
    /// always empty — kept as a field so a future multi-cert CA bundle
    /// wouldn't need a signature change here.
    ca_chain: Vec<CertificateDer<'static>>,
    flight: SingleFlight,
}

impl CaIssuer {
    /// Loads the CA certificate and private key from PEM files. Supports
    /// ECDSA and RSA CA keys (`KeyPair::from_pem` autodetects the algorithm).
    pub fn load(ca_cert_path: &Path, ca_key_path: &Path) -> Result<Self, ConfigError> {
        let ca_cert_pem = fs::read_to_string(ca_cert_path).map_err(|source| ConfigError::Read {
            path: ca_cert_path.display().to_string(),
            source,
        })?;
        let ca_key_pem = fs::read_to_string(ca_key_path).map_err(|source| ConfigError::Read {
            path: ca_key_path.display().to_string(),
            source,
        })?;

        let ca_key = KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| ConfigError::InvalidCaKey(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(&ca_cert_pem)
            .map_err(|e| ConfigError::InvalidCaCert(e.to_string()))?;
        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| ConfigError::InvalidCaCert(e.to_string()))?;

        // `from_ca_cert_pem` parses only the first PEM block, so the loaded
        // CA is always the self-signed root itself, never an intermediate
        // chain. The chain appended to leaves is therefore empty.
        let ca_chain = Vec::new();

        Ok(Self {
            ca_cert,
            ca_key,
            ca_chain,
            flight: SingleFlight::new(MAX_CACHED_LEAVES),
        })
    }

    fn mint(ca_cert: &rcgen::Certificate, ca_key: &KeyPair, chain: &[CertificateDer<'static>], hostname: String) -> Result<LeafCert, IssuerError> {
        let mut params = CertificateParams::default();

        if let Ok(ip) = IpAddr::from_str(&hostname) {
            params.subject_alt_names = vec![SanType::IpAddress(ip)];
        } else {
            params.subject_alt_names = vec![SanType::DnsName(
                Ia5String::try_from(hostname.as_str())
                    .map_err(|_| IssuerError::InvalidHostname(hostname.clone()))?,
            )];
        }

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname.as_str());
        dn.push(DnType::OrganizationName, "Proxy");
        params.distinguished_name = dn;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        let now = OffsetDateTime::now_utc();
        let not_before = now.checked_sub(Duration::hours(24)).unwrap_or(now);
        let not_after = now.checked_add(Duration::days(366)).unwrap_or(now);
        params.not_before = not_before;
        params.not_after = not_after;
        params.serial_number = Some((now.unix_timestamp_nanos() as u64).into());

        let leaf_key =
            KeyPair::generate().map_err(|e| IssuerError::KeyGeneration(e.to_string()))?;
        let leaf = params
            .signed_by(&leaf_key, ca_cert, ca_key)
            .map_err(|e| IssuerError::Signing(e.to_string()))?;

        let mut full_chain = Vec::with_capacity(1 + chain.len());
        full_chain.push(leaf.der().clone());
        full_chain.extend(chain.iter().cloned());

        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));

        Ok(LeafCert {
            chain: full_chain,
            key: Arc::new(key),
            not_after,
        })
    }
}

#[async_trait::async_trait]
impl Issuer for CaIssuer {
    async fn issue(&self, hostname: &str) -> Result<LeafCert, IssuerError> {
        // rcgen::Certificate/KeyPair aren't Send+Sync-free-to-clone-into-an-async-move,
        // but they're immutable for the process lifetime, so a raw pointer-free copy
        // of the owned values we need is taken up front via the chain/DER bytes only.
        let ca_cert = self.ca_cert.der().clone();
        let ca_key_der = self.ca_key.serialize_der();
        let chain = self.ca_chain.clone();
        let hostname = hostname.to_string();

        let mint_hostname = hostname.clone();
        self.flight
            .get_or_produce(&hostname, move || async move {
                let ca_key = KeyPair::try_from(ca_key_der)
                    .map_err(|e| IssuerError::KeyGeneration(e.to_string()))?;
                let ca_params = CertificateParams::from_ca_cert_der(&ca_cert)
                    .map_err(|e| IssuerError::Signing(e.to_string()))?;
                let ca_cert = ca_params
                    .self_signed(&ca_key)
                    .map_err(|e| IssuerError::Signing(e.to_string()))?;
                CaIssuer::mint(&ca_cert, &ca_key, &chain, mint_hostname)
            })
            .await
    }
}

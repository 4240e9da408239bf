//! Error taxonomy. Each domain gets a `thiserror` enum; call sites that only
//! need to log-and-continue or log-and-exit compose these under `anyhow::Result`.

use thiserror::Error;

/// Startup-only failures: bad CA material, unreadable files, unsupported key types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CA certificate: {0}")]
    InvalidCaCert(String),
    #[error("failed to parse CA private key: {0}")]
    InvalidCaKey(String),
}

/// Per-hostname certificate production failures. Never cached; all
/// single-flight waiters for the same hostname observe the same error.
#[derive(Debug, Error, Clone)]
pub enum IssuerError {
    #[error("failed to generate leaf key pair: {0}")]
    KeyGeneration(String),
    #[error("failed to sign leaf certificate: {0}")]
    Signing(String),
    #[error("invalid hostname for certificate: {0}")]
    InvalidHostname(String),
    #[error("no pre-issued certificate for '{0}'")]
    NotFound(String),
    #[error("failed to load pre-issued certificate for '{0}': {1}")]
    Load(String, String),
    #[error("failed to parse issued certificate: {0}")]
    ParseFailure(String),
}

/// Per-request failures surfaced to the client as a terminal HTTP status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request URL is not absolute-form")]
    NotAbsolute,
    #[error("failed to hijack client connection")]
    HijackFailed,
    #[error("upstream transport error: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

impl ProxyError {
    /// The HTTP status this error maps to when written back to the client.
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::NotAbsolute => 400,
            ProxyError::HijackFailed | ProxyError::Upstream(_) => 502,
        }
    }
}

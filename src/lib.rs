//! A transparent HTTP CONNECT proxy that intercepts TLS sessions by minting
//! per-hostname leaf certificates on the fly, signed by a locally trusted CA.

pub mod cache;
pub mod config;
pub mod error;
pub mod inspector;
pub mod issuer;
pub mod net;
pub mod proxy;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

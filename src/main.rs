use std::process::ExitCode;
use std::sync::Arc;

use connect_mitm::config::{self, Config};
use connect_mitm::inspector::ForbidReceivePack;
use connect_mitm::issuer::{CaIssuer, Issuer, PreIssuedLoader};
use connect_mitm::proxy::Proxy;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let _ = rustls::crypto::ring::default_provider().install_default();
    let config = config::parse_args();

    let issuer: Arc<dyn Issuer> = match build_issuer(&config) {
        Ok(issuer) => issuer,
        Err(e) => {
            error!(error = %e, "failed to initialize certificate issuer");
            return ExitCode::FAILURE;
        }
    };

    let proxy = Arc::new(Proxy::new(issuer, Arc::new(ForbidReceivePack)));

    if let Err(e) = proxy.run(&listen_addr(&config.listen)).await {
        error!(error = %e, "proxy terminated");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn build_issuer(config: &Config) -> anyhow::Result<Arc<dyn Issuer>> {
    if let Some(dir) = &config.certs_dir {
        return Ok(Arc::new(PreIssuedLoader::new(dir)));
    }
    Ok(Arc::new(CaIssuer::load(&config.ca_cert, &config.ca_key)?))
}

/// Translates a Go-style `:8080` listen address into one `TcpListener::bind`
/// accepts, binding all interfaces when no host is given.
fn listen_addr(listen: &str) -> String {
    if let Some(port) = listen.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        listen.to_string()
    }
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::level_filters::LevelFilter::INFO)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

//! Command-line configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub certs_dir: Option<PathBuf>,
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ":8080".to_string(),
            certs_dir: None,
            ca_cert: PathBuf::from("cert.pem"),
            ca_key: PathBuf::from("key.pem"),
        }
    }
}

pub fn parse_args() -> Config {
    let mut config = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" => {
                if let Some(value) = args.next() {
                    config.listen = value;
                }
            }
            "--certs-dir" => {
                if let Some(value) = args.next() {
                    config.certs_dir = Some(PathBuf::from(value));
                }
            }
            "--ca-cert" => {
                if let Some(value) = args.next() {
                    config.ca_cert = PathBuf::from(value);
                }
            }
            "--ca-key" => {
                if let Some(value) = args.next() {
                    config.ca_key = PathBuf::from(value);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}");
                print_usage();
                std::process::exit(2);
            }
        }
    }

    config
}

fn print_usage() {
    eprintln!("connect-mitm");
    eprintln!();
    eprintln!("Usage: connect-mitm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --listen <ADDR>       Address to listen on (default: :8080)");
    eprintln!("  --certs-dir <DIR>     Serve pre-issued certificates from this directory");
    eprintln!("                        instead of minting them from a CA");
    eprintln!("  --ca-cert <PATH>      CA certificate PEM (default: cert.pem)");
    eprintln!("  --ca-key <PATH>       CA private key PEM (default: key.pem)");
    eprintln!("  --help, -h            Show this help");
}

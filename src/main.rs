//! Simple API Server - programmable mock resource server

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use simple_api_server::{
    cli::{Cli, Command},
    config::Config,
    mtls::write_pki_layout,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Certs {
            out,
            san,
            client_cn,
            days,
        }) => run_certs(&out, &san, &client_cn, days),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run the resource server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.bind_port = port;
            }
            if let Some(host) = cli.host {
                config.bind_host = host;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Generate throwaway PKI for local mTLS testing
fn run_certs(out: &Path, san: &[String], client_cn: &str, days: u32) -> ExitCode {
    match write_pki_layout(out, san, client_cn, days) {
        Ok(layout) => {
            println!("Generated certificates in {}", out.display());
            println!("  CA certificate:     {}", layout.ca_cert.display());
            println!("  Server certificate: {}", layout.server_cert.display());
            println!("  Server key:         {}", layout.server_key.display());
            println!("  Client certificate: {}", layout.client_cert.display());
            println!("  Client key:         {}", layout.client_key.display());
            println!("  Trust directory:    {}", layout.trust_dir.display());
            println!();
            println!("Start with: ENABLE_MTLS=true CERTS_DIR={} simple-api-server", out.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to generate certificates: {e}");
            ExitCode::FAILURE
        }
    }
}

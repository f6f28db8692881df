//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Programmable mock resource server with OAuth2, Basic and mTLS authentication
#[derive(Parser, Debug)]
#[command(name = "simple-api-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SIMPLE_API_SERVER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides `BIND_PORT`)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides `BIND_HOST`)
    #[arg(long)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SIMPLE_API_SERVER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SIMPLE_API_SERVER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Generate a CA, a server certificate and one trusted client certificate
    Certs {
        /// Output directory, laid out like the default `CERTS_DIR`
        #[arg(short, long, required = true)]
        out: PathBuf,

        /// DNS names for the server certificate
        #[arg(long = "san", default_value = "localhost")]
        san: Vec<String>,

        /// Common name of the client certificate
        #[arg(long, default_value = "declarest-e2e-client")]
        client_cn: String,

        /// Validity in days for every generated certificate
        #[arg(long, default_value_t = 365)]
        days: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["simple-api-server", "--port", "9090"]).unwrap();
        assert_eq!(cli.port, Some(9090));
        assert!(cli.command.is_none());
    }

    #[test]
    fn certs_defaults() {
        let cli = Cli::try_parse_from(["simple-api-server", "certs", "--out", "/tmp/pki"]).unwrap();
        match cli.command {
            Some(Command::Certs {
                out,
                san,
                client_cn,
                days,
            }) => {
                assert_eq!(out, PathBuf::from("/tmp/pki"));
                assert_eq!(san, vec!["localhost".to_string()]);
                assert_eq!(client_cn, "declarest-e2e-client");
                assert_eq!(days, 365);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn san_is_repeatable() {
        let cli = Cli::try_parse_from([
            "simple-api-server",
            "certs",
            "--out",
            "pki",
            "--san",
            "localhost",
            "--san",
            "api.test",
        ])
        .unwrap();
        let Some(Command::Certs { san, .. }) = cli.command else {
            panic!("expected certs");
        };
        assert_eq!(san, vec!["localhost".to_string(), "api.test".to_string()]);
    }

    #[test]
    fn certs_requires_out() {
        assert!(Cli::try_parse_from(["simple-api-server", "certs"]).is_err());
    }
}

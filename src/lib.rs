//! Simple API Server Library
//!
//! Programmable mock resource server for end-to-end tests of API clients.
//!
//! # Features
//!
//! - **Resource store**: any path accepts JSON via `POST`/`PUT`/`PATCH`, reads
//!   back via `GET`/`HEAD`, lists direct children as a collection
//! - **OAuth2**: client-credentials `/token` endpoint issuing bearer tokens
//! - **Basic auth**: static credentials, alone or alongside bearer tokens
//! - **Mutual TLS**: client certificates checked against a trust directory
//!   that can change while the server runs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod mtls;
pub mod path;
pub mod server;
pub mod store;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

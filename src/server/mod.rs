//! Resource server
//!
//! Binds the listener, wraps it in mutual TLS when enabled, and serves the
//! router until a shutdown signal arrives.

pub mod oauth;
pub mod router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use router::{ALLOWED_METHODS, AppState, Verb, create_router};

use crate::auth::Gatekeeper;
use crate::config::Config;
use crate::mtls::{TlsContextProvider, TlsListener, TrustReload, TrustWatcher};
use crate::store::ResourceStore;
use crate::token::TokenRegistry;
use crate::{Error, Result};

/// OAuth2 token issuance endpoint
pub const TOKEN_PATH: &str = "/token";

/// Unauthenticated health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Simple API server
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server with an empty store and token registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is out of range.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenRegistry::new());
        let gatekeeper = Arc::new(Gatekeeper::new(config.auth_settings(), tokens));
        let state = Arc::new(AppState {
            store: Arc::new(ResourceStore::new()),
            gatekeeper,
        });

        Ok(Self { config, state })
    }

    /// The HTTP router, without a listener
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound, the initial mTLS
    /// context cannot be built, or the server fails.
    pub async fn run(self) -> Result<()> {
        let host = self.config.bind_host.clone();
        let port = self.config.bind_port;
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| Error::Config(format!("Cannot bind {host}:{port}: {e}")))?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial mTLS context cannot be built or the
    /// server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let app = self.router();

        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_notifier = shutdown_tx.clone();
        let shutdown = async move {
            shutdown.await;
            info!("Shutdown signal received");
            let _ = shutdown_notifier.send(());
        };

        if self.config.enable_mtls {
            let provider = Arc::new(TlsContextProvider::new(self.config.mtls_settings())?);

            let _watcher = match provider.settings().reload {
                TrustReload::Watch => Some(TrustWatcher::start(
                    Arc::clone(&provider),
                    shutdown_tx.subscribe(),
                )?),
                TrustReload::Connection => None,
            };

            self.log_banner("https", local_addr);
            let listener = TlsListener::new(listener, provider)?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        } else {
            self.log_banner("http", local_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        info!("Server stopped");
        Ok(())
    }

    fn log_banner(&self, scheme: &str, addr: SocketAddr) {
        info!("============================================================");
        info!("SIMPLE API SERVER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(
            scheme,
            addr = %addr,
            oauth2 = self.config.enable_oauth2,
            basic_auth = self.config.enable_basic_auth,
            mtls = self.config.enable_mtls,
            "Listening on {scheme}://{addr}"
        );

        if self.config.enable_mtls {
            let mtls = self.config.mtls_settings();
            info!(trust = %mtls.trust, reload = ?mtls.reload, "MUTUAL TLS enabled");
        }
        if self.config.enable_oauth2 {
            info!("  POST {scheme}://{addr}{TOKEN_PATH}  (client credentials)");
        }
        if !self.config.enable_oauth2 && !self.config.enable_basic_auth && !self.config.enable_mtls
        {
            warn!("AUTHENTICATION disabled - every request is accepted");
        }
        info!("============================================================");
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

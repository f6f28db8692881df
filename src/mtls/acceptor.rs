//! Per-connection TLS handshakes
//!
//! [`TlsListener`] accepts TCP connections on a background task and runs each
//! handshake on its own task, so a slow or failing client never stalls the
//! accept loop. A connection whose trust context cannot be built, or whose
//! handshake fails, is closed and logged; the listener keeps accepting.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::serve::Listener;
use parking_lot::RwLock;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use super::cert_manager::build_server_config;
use super::identity::CertIdentity;
use super::{MtlsSettings, TrustReload};
use crate::{Error, Result};

/// Upper bound on a single handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Established TLS connections waiting for the HTTP server.
const READY_BACKLOG: usize = 128;

/// Hands out the rustls config for each new connection.
#[derive(Debug)]
pub struct TlsContextProvider {
    settings: MtlsSettings,
    cached: RwLock<Arc<ServerConfig>>,
}

impl TlsContextProvider {
    /// Build the initial trust context.
    ///
    /// # Errors
    ///
    /// Returns an error if the server certificate, key or trust material is
    /// unusable. At startup this is fatal.
    pub fn new(settings: MtlsSettings) -> Result<Self> {
        let initial = build_server_config(&settings)?;
        Ok(Self {
            settings,
            cached: RwLock::new(Arc::new(initial)),
        })
    }

    /// Settings the contexts are built from
    #[must_use]
    pub fn settings(&self) -> &MtlsSettings {
        &self.settings
    }

    /// Context for a newly accepted connection.
    ///
    /// With [`TrustReload::Connection`] this reads the trust material from
    /// disk again, on the blocking pool. With [`TrustReload::Watch`] it
    /// returns the cached context.
    ///
    /// # Errors
    ///
    /// Returns an error if a fresh context cannot be built.
    pub async fn context(&self) -> Result<Arc<ServerConfig>> {
        match self.settings.reload {
            TrustReload::Watch => Ok(self.current()),
            TrustReload::Connection => {
                let settings = self.settings.clone();
                let config = tokio::task::spawn_blocking(move || build_server_config(&settings))
                    .await
                    .map_err(|e| Error::Internal(format!("Trust context task failed: {e}")))??;
                Ok(Arc::new(config))
            }
        }
    }

    /// The most recently built context
    #[must_use]
    pub fn current(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.cached.read())
    }

    /// Rebuild the cached context from disk.
    ///
    /// On failure the previous context stays in place.
    ///
    /// # Errors
    ///
    /// Returns the build error.
    pub fn reload(&self) -> Result<()> {
        let config = build_server_config(&self.settings)?;
        *self.cached.write() = Arc::new(config);
        info!("Trust context reloaded");
        Ok(())
    }
}

/// Run the server side of a TLS handshake on `stream`.
///
/// # Errors
///
/// Returns an error if no trust context is available, the handshake times
/// out, or the client is refused.
pub async fn handshake(
    provider: &TlsContextProvider,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<TlsStream<TcpStream>> {
    let config = provider.context().await.map_err(io::Error::other)?;

    let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, TlsAcceptor::from(config).accept(stream))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;

    let identity = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|cert| CertIdentity::from_der(cert).ok());
    if let Some(identity) = identity {
        debug!(peer = %peer, client = %identity.display_name, "mTLS client accepted");
    }

    Ok(tls)
}

/// [`Listener`] yielding only connections that completed an mTLS handshake.
#[derive(Debug)]
pub struct TlsListener {
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    /// Start accepting on `listener`, handshaking with contexts from `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub fn new(listener: TcpListener, provider: Arc<TlsContextProvider>) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (ready_tx, ready) = mpsc::channel(READY_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(listener, provider, ready_tx));

        Ok(Self {
            ready,
            local_addr,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(connection) => connection,
            // The accept task only stops when this listener is dropped.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    provider: Arc<TlsContextProvider>,
    ready_tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Failed to accept TCP connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let provider = Arc::clone(&provider);
        let ready_tx = ready_tx.clone();
        tokio::spawn(async move {
            match handshake(&provider, stream, peer).await {
                Ok(tls) => {
                    let _ = ready_tx.send((tls, peer)).await;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed, connection closed");
                }
            }
        });
    }
}

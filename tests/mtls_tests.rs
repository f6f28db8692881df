//! Mutual TLS against a live listener: fail-closed startup and trust hot-reload

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsConnector;

use simple_api_server::config::Config;
use simple_api_server::mtls::{
    PkiLayout, TrustReload, load_certs, load_private_key, write_pki_layout,
};
use simple_api_server::server::Server;

const CLIENT_CN: &str = "e2e-client";

struct Running {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(certs_dir: &Path, reload: TrustReload) -> Running {
    let config = Config {
        enable_oauth2: false,
        enable_mtls: true,
        certs_dir: certs_dir.to_path_buf(),
        trust_reload: reload,
        ..Config::default()
    };
    let server = Server::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve(listener, async move {
        let _ = rx.await;
    }));

    Running {
        addr,
        shutdown: Some(tx),
    }
}

fn client_config(layout: &PkiLayout) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&layout.ca_cert).unwrap() {
        roots.add(cert).unwrap();
    }

    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_client_auth_cert(
            load_certs(&layout.client_cert).unwrap(),
            load_private_key(&layout.client_key).unwrap(),
        )
        .unwrap();
    Arc::new(config)
}

/// Status line of `GET /health`, or an empty string if the connection was refused.
async fn health_status(addr: SocketAddr, config: Arc<ClientConfig>) -> String {
    let Ok(tcp) = TcpStream::connect(addr).await else {
        return String::new();
    };
    let server_name = ServerName::try_from("localhost").unwrap();
    let Ok(mut tls) = TlsConnector::from(config).connect(server_name, tcp).await else {
        return String::new();
    };

    let request = b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    if tls.write_all(request).await.is_err() {
        return String::new();
    }

    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match tls.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
        }
    }

    String::from_utf8_lossy(&received)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

async fn eventually_ok(addr: SocketAddr, config: &Arc<ClientConfig>) -> bool {
    for _ in 0..50 {
        if health_status(addr, Arc::clone(config)).await.starts_with("HTTP/1.1 200") {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn pki(dir: &Path) -> PkiLayout {
    write_pki_layout(dir, &["localhost".to_string()], CLIENT_CN, 30).unwrap()
}

fn untrust(layout: &PkiLayout) -> PathBuf {
    let trusted = layout.trust_dir.join(format!("{CLIENT_CN}.crt"));
    fs::remove_file(&trusted).unwrap();
    trusted
}

#[tokio::test]
async fn trusted_client_reaches_health() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    let server = start(dir.path(), TrustReload::Connection).await;

    let status = health_status(server.addr, client_config(&layout)).await;
    assert!(status.starts_with("HTTP/1.1 200"), "got {status:?}");
}

#[tokio::test]
async fn empty_trust_directory_refuses_every_client() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    untrust(&layout);
    let server = start(dir.path(), TrustReload::Connection).await;

    let status = health_status(server.addr, client_config(&layout)).await;
    assert!(!status.starts_with("HTTP/1.1 200"), "got {status:?}");
}

#[tokio::test]
async fn client_from_another_ca_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    let server = start(dir.path(), TrustReload::Connection).await;

    let stranger_dir = tempfile::tempdir().unwrap();
    let stranger = pki(stranger_dir.path());
    // Trust the server's CA but present a client certificate it never saw.
    let config = {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&layout.ca_cert).unwrap() {
            roots.add(cert).unwrap();
        }
        ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_client_auth_cert(
                load_certs(&stranger.client_cert).unwrap(),
                load_private_key(&stranger.client_key).unwrap(),
            )
            .unwrap()
    };

    let status = health_status(server.addr, Arc::new(config)).await;
    assert!(!status.starts_with("HTTP/1.1 200"), "got {status:?}");
}

#[tokio::test]
async fn connection_mode_picks_up_new_trust_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    let trusted = untrust(&layout);
    let server = start(dir.path(), TrustReload::Connection).await;
    let config = client_config(&layout);

    let refused = health_status(server.addr, Arc::clone(&config)).await;
    assert!(!refused.starts_with("HTTP/1.1 200"), "got {refused:?}");

    fs::copy(&layout.client_cert, &trusted).unwrap();
    let accepted = health_status(server.addr, config).await;
    assert!(accepted.starts_with("HTTP/1.1 200"), "got {accepted:?}");
}

#[tokio::test]
async fn watch_mode_reloads_after_file_change() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    let trusted = untrust(&layout);
    let server = start(dir.path(), TrustReload::Watch).await;
    let config = client_config(&layout);

    let refused = health_status(server.addr, Arc::clone(&config)).await;
    assert!(!refused.starts_with("HTTP/1.1 200"), "got {refused:?}");

    fs::copy(&layout.client_cert, &trusted).unwrap();
    assert!(eventually_ok(server.addr, &config).await);
}

#[tokio::test]
async fn missing_server_certificate_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    fs::remove_file(&layout.server_cert).unwrap();

    let config = Config {
        enable_mtls: true,
        certs_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = Server::new(config)
        .unwrap()
        .serve(listener, std::future::pending())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn watch_mode_notices_trust_directory_created_later() {
    let dir = tempfile::tempdir().unwrap();
    let layout = pki(dir.path());
    fs::remove_dir_all(&layout.trust_dir).unwrap();
    let server = start(dir.path(), TrustReload::Watch).await;
    let config = client_config(&layout);

    let refused = health_status(server.addr, Arc::clone(&config)).await;
    assert!(!refused.starts_with("HTTP/1.1 200"), "got {refused:?}");

    fs::create_dir_all(&layout.trust_dir).unwrap();
    fs::copy(
        &layout.client_cert,
        layout.trust_dir.join(format!("{CLIENT_CN}.crt")),
    )
    .unwrap();
    assert!(eventually_ok(server.addr, &config).await);
}

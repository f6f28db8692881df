//! Hot-reload file watcher for trust material
//!
//! Used with `TrustReload::Watch`: watches the trust directory (or the
//! directories holding explicitly listed trust files) and the server
//! certificate directory, and rebuilds the cached trust context once file
//! events in them settle.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{MtlsSettings, TlsContextProvider, TrustSource};
use crate::{Error, Result};

/// Quiet period after the last file event before rebuilding
const DEBOUNCE: Duration = Duration::from_millis(500);

/// File watcher driving trust context reloads
///
/// Stops when the shutdown channel fires or when this handle is dropped.
pub struct TrustWatcher {
    task: JoinHandle<()>,
}

impl TrustWatcher {
    /// Start watching the trust material behind `provider`.
    ///
    /// Spawns a background task that calls `provider.reload()` after file
    /// changes settle, until `shutdown_rx` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn start(
        provider: Arc<TlsContextProvider>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let targets = watched_directories(provider.settings());
        debug!(directories = ?targets, "Starting trust watcher");

        let (event_tx, event_rx) = mpsc::channel(100);
        let mut watches = Watches {
            watcher: create_watcher(event_tx)?,
            targets,
            active: BTreeSet::new(),
        };
        watches.refresh();

        let task = tokio::spawn(reload_loop(provider, watches, event_rx, shutdown_rx));
        Ok(Self { task })
    }
}

impl Drop for TrustWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The platform watcher plus the directories it should cover.
///
/// A target that does not exist yet is covered by its nearest existing
/// ancestor until it appears.
struct Watches {
    watcher: RecommendedWatcher,
    targets: Vec<PathBuf>,
    active: BTreeSet<PathBuf>,
}

impl Watches {
    fn refresh(&mut self) {
        let wanted: BTreeSet<PathBuf> = self
            .targets
            .iter()
            .filter_map(|target| {
                let found = nearest_existing(target);
                if found.is_none() {
                    warn!(directory = %target.display(), "No existing directory to watch");
                }
                found
            })
            .collect();

        let stale: Vec<PathBuf> = self.active.difference(&wanted).cloned().collect();
        for dir in stale {
            // Fails harmlessly when the directory itself was removed.
            let _ = self.watcher.unwatch(&dir);
            self.active.remove(&dir);
        }

        // Re-adding restores the watch on a directory recreated under the same name.
        for dir in wanted {
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    if self.active.insert(dir.clone()) {
                        if self.targets.contains(&dir) {
                            info!(directory = %dir.display(), "Watching for trust material changes");
                        } else {
                            info!(
                                directory = %dir.display(),
                                "Watching ancestor until trust directory is created"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(directory = %dir.display(), error = %e, "Failed to watch directory");
                }
            }
        }
    }
}

fn create_watcher(event_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    RecommendedWatcher::new(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) => {
                let is_relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                );
                if is_relevant {
                    debug!(paths = ?event.paths, kind = ?event.kind, "Trust material change");
                    // Full channel means a reload is already pending
                    let _ = event_tx.try_send(());
                }
            }
            Err(e) => {
                error!(error = %e, "File watcher error");
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )
    .map_err(|e| Error::Internal(format!("Failed to create file watcher: {e}")))
}

async fn reload_loop(
    provider: Arc<TlsContextProvider>,
    mut watches: Watches,
    mut event_rx: mpsc::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut last_event: Option<Instant> = None;
    let mut interval = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            Some(()) = event_rx.recv() => {
                last_event = Some(Instant::now());
            }
            _ = interval.tick() => {
                if last_event.is_some_and(|last| last.elapsed() >= DEBOUNCE) {
                    last_event = None;
                    // Pick up directories created since the last pass before
                    // reading them, so later writes still raise events.
                    watches.refresh();

                    let provider = Arc::clone(&provider);
                    let outcome = tokio::task::spawn_blocking(move || provider.reload()).await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(error = %e, "Trust reload failed, keeping previous context");
                        }
                        Err(e) => {
                            error!(error = %e, "Trust reload task panicked");
                        }
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Trust watcher shutting down");
                break;
            }
        }
    }
}

/// `dir` itself if it exists, otherwise its closest existing ancestor.
fn nearest_existing(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .find(|p| p.is_dir())
        .map(Path::to_path_buf)
}

/// Directories whose contents feed the trust context, de-duplicated.
#[must_use]
pub fn watched_directories(settings: &MtlsSettings) -> Vec<PathBuf> {
    let mut dirs = BTreeSet::new();

    match &settings.trust {
        TrustSource::Directory(dir) => {
            dirs.insert(dir.clone());
        }
        TrustSource::Files(files) => {
            dirs.extend(files.iter().filter_map(|f| parent_dir(f)));
        }
    }
    dirs.extend(parent_dir(&settings.server_cert));
    dirs.extend(parent_dir(&settings.server_key));

    dirs.into_iter().collect()
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

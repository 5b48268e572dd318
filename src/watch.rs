//! Continuous-watch coordinator
//!
//! One event loop hosts everything: file-system watchers for tailable
//! files (with a short stable-write debounce), a polling interval for
//! split-file transcripts (their part directories hold tens of thousands
//! of leaf files, so subscribing to all of them is pathological), a
//! rediscovery interval that picks up new sessions and repositories, and
//! a shutdown channel. Watcher and tick errors are logged and the loop
//! continues; only `stop()` ends it.

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, SourceKind};
use crate::config::Config;
use crate::ingest::Ingestor;
use crate::store::{SourceStatus, Store};

pub const PID_FILE: &str = "recall-watch.pid";

pub struct Coordinator {
    resources: Option<Resources>,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

struct Resources {
    store: Store,
    registry: AdapterRegistry,
    config: Config,
    device_id: String,
}

impl Coordinator {
    pub fn new(store: Store, registry: AdapterRegistry, config: Config, device_id: String) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            resources: Some(Resources {
                store,
                registry,
                config,
                device_id,
            }),
            handle: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the watch loop. Calling again while running is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let Some(resources) = self.resources.take() else {
            return;
        };
        let shutdown = self.shutdown_rx.clone();
        self.handle = Some(tokio::spawn(run_loop(resources, shutdown)));
    }

    /// Signal shutdown and wait for the current tick to finish.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

async fn run_loop(resources: Resources, mut shutdown: watch::Receiver<bool>) {
    let Resources {
        store,
        registry,
        config,
        device_id,
    } = resources;

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for path in event.paths {
                    let _ = fs_tx.send(path);
                }
            }
            Err(e) => tracing::warn!("Watcher error: {}", e),
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!("Could not create file watcher: {}", e);
            return;
        }
    };

    // Event path -> source id, plus the set of directories under watch.
    let mut file_map: HashMap<PathBuf, String> = HashMap::new();
    let mut watched_dirs: HashSet<PathBuf> = HashSet::new();

    let ingest_tick = |store: &Store, registry: &AdapterRegistry, source_id: &str| {
        let ingestor = Ingestor::new(store, registry, device_id.clone());
        let source = match store.get_source(source_id) {
            Ok(Some(s)) => s,
            Ok(None) => return,
            Err(e) => {
                warn!("Source lookup failed: {:#}", e);
                return;
            }
        };
        if source.status == SourceStatus::Paused {
            return;
        }
        if let Err(e) = tokio::task::block_in_place(|| ingestor.ingest_source(&source)) {
            warn!(source = %source_id, "Watch ingest failed: {:#}", e);
            let _ = store.set_source_status(
                source_id,
                SourceStatus::Error,
                Some(&format!("{:#}", e)),
            );
        }
    };

    // Initial sweep: register what exists, ingest it, wire watchers.
    {
        let ingestor = Ingestor::new(&store, &registry, device_id.clone());
        if let Err(e) = tokio::task::block_in_place(|| ingestor.auto_register()) {
            warn!("Initial discovery failed: {:#}", e);
        }
        let summary = tokio::task::block_in_place(|| ingestor.ingest_all());
        info!(
            sources = summary.sources,
            inserted = summary.events_inserted,
            "Initial ingest complete"
        );
    }
    rewire(&store, &mut watcher, &mut file_map, &mut watched_dirs);

    let debounce = Duration::from_millis(config.watch.debounce_ms().max(10));
    let mut pending: HashMap<String, Instant> = HashMap::new();

    let mut debounce_tick =
        interval(Duration::from_millis((config.watch.debounce_ms() / 2).max(50)));
    let mut split_tick = interval(Duration::from_secs(config.watch.split_poll_secs().max(1)));
    let mut rediscover_tick =
        interval(Duration::from_secs(config.watch.rediscover_secs().max(5)));
    // Consume the immediate first tick of each interval.
    debounce_tick.tick().await;
    split_tick.tick().await;
    rediscover_tick.tick().await;

    info!("Watch coordinator running");

    loop {
        tokio::select! {
            Some(path) = fs_rx.recv() => {
                if let Some(source_id) = file_map.get(&path) {
                    debug!(path = %path.display(), "Change event");
                    pending.insert(source_id.clone(), Instant::now());
                }
            }

            _ = debounce_tick.tick() => {
                let now = Instant::now();
                let ready: Vec<String> = pending
                    .iter()
                    .filter(|(_, last)| now.duration_since(**last) >= debounce)
                    .map(|(id, _)| id.clone())
                    .collect();
                for source_id in ready {
                    pending.remove(&source_id);
                    ingest_tick(&store, &registry, &source_id);
                }
            }

            _ = split_tick.tick() => {
                match store.list_sources(None) {
                    Ok(sources) => {
                        for source in sources {
                            if source.kind == SourceKind::SplitTranscript
                                && source.status != SourceStatus::Paused
                            {
                                ingest_tick(&store, &registry, &source.source_id);
                            }
                        }
                    }
                    Err(e) => warn!("Split poll failed: {:#}", e),
                }
            }

            _ = rediscover_tick.tick() => {
                let ingestor = Ingestor::new(&store, &registry, device_id.clone());
                match tokio::task::block_in_place(|| ingestor.auto_register()) {
                    Ok(0) => {}
                    Ok(n) => {
                        info!(new_sources = n, "Rediscovery found new sources");
                        let _ = tokio::task::block_in_place(|| ingestor.ingest_all());
                    }
                    Err(e) => warn!("Rediscovery failed: {:#}", e),
                }
                // Missing sources may have come back; rewire watchers.
                rewire(&store, &mut watcher, &mut file_map, &mut watched_dirs);
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Watch coordinator stopping");
                    break;
                }
            }
        }
    }
}

/// Point the watcher at every watchable source. Tailable transcripts
/// watch their parent directory (rotation replaces the file itself);
/// git repositories watch the reflog directory.
fn rewire(
    store: &Store,
    watcher: &mut notify::RecommendedWatcher,
    file_map: &mut HashMap<PathBuf, String>,
    watched_dirs: &mut HashSet<PathBuf>,
) {
    let sources = match store.list_sources(None) {
        Ok(s) => s,
        Err(e) => {
            warn!("Listing sources for rewire failed: {:#}", e);
            return;
        }
    };

    for source in sources {
        let (event_path, watch_dir) = match source.kind {
            SourceKind::JsonlTranscript | SourceKind::PlainTranscript => {
                let path = PathBuf::from(&source.locator);
                let parent = match path.parent() {
                    Some(p) => p.to_path_buf(),
                    None => continue,
                };
                (path, parent)
            }
            SourceKind::Git => {
                let logs = Path::new(&source.locator).join(".git/logs");
                (logs.join("HEAD"), logs)
            }
            SourceKind::SplitTranscript => continue,
        };

        file_map.insert(event_path, source.source_id.clone());

        if watch_dir.exists() && !watched_dirs.contains(&watch_dir) {
            match watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    watched_dirs.insert(watch_dir);
                }
                Err(e) => debug!(dir = %watch_dir.display(), "Watch failed: {}", e),
            }
        }
    }
}

// ============================================
// DAEMON PID FILE
// ============================================

pub fn pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PID_FILE)
}

pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}", std::process::id())).context("Failed to write PID file")
}

pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn remove_pid_file(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// A recorded PID counts as running only if the process answers a
/// signal-0 probe.
pub fn is_pid_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::resilience::{retry_with_backoff, Backoff};

use super::types::{WindowMetadata, WindowSnapshot};

/// OS-level foreground window query. Implementations are platform bridges
/// (or mocks in tests); they may fail transiently and are retried by the
/// observer.
#[async_trait]
pub trait WindowQuery: Send + Sync {
    async fn active_window(&self) -> Result<WindowMetadata>;
}

#[derive(Debug, Clone)]
pub struct WindowObserverConfig {
    /// How long a successful poll is served from cache.
    pub cache_ttl: Duration,
    /// Quiet period before a window change is announced, to ride out
    /// window-manager churn during fast app switches.
    pub debounce: Duration,
    /// Period of the background poll loop.
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Minimum spacing between process-table refreshes.
    pub process_refresh_interval: Duration,
}

impl Default for WindowObserverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(500),
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            process_refresh_interval: Duration::from_secs(5),
        }
    }
}

/// Resolves an application name to its process name by scanning the process
/// table. Refreshes lazily so repeated lookups within a poll burst reuse one
/// scan.
pub struct ProcessIndex {
    system: System,
    refreshed_at: Option<Instant>,
    refresh_interval: Duration,
}

impl ProcessIndex {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            system: System::new(),
            refreshed_at: None,
            refresh_interval,
        }
    }

    pub fn process_name_for(&mut self, app_name: &str) -> Option<String> {
        if app_name.is_empty() {
            return None;
        }

        let stale = self
            .refreshed_at
            .map(|at| at.elapsed() >= self.refresh_interval)
            .unwrap_or(true);
        if stale {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                ProcessRefreshKind::new(),
            );
            self.refreshed_at = Some(Instant::now());
        }

        let needle = app_name.to_lowercase();
        let compact = needle.replace(' ', "");

        for process in self.system.processes().values() {
            let name = process.name().to_string_lossy().to_lowercase();
            if name == needle || name == compact || needle.contains(&name) && name.len() > 2 {
                return Some(process.name().to_string_lossy().into_owned());
            }
        }

        None
    }
}

struct CacheCell {
    snapshot: Option<WindowSnapshot>,
    fetched_at: Option<Instant>,
}

/// Polls the OS for the foreground window, bounding poll frequency with a
/// short-lived cache, retrying transient failures, and falling back to the
/// last known snapshot rather than failing the caller.
pub struct WindowObserver {
    query: Arc<dyn WindowQuery>,
    config: WindowObserverConfig,
    cached: Mutex<CacheCell>,
    processes: Mutex<ProcessIndex>,
    change_tx: watch::Sender<Option<WindowSnapshot>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    poll_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl WindowObserver {
    pub fn new(query: Arc<dyn WindowQuery>, config: WindowObserverConfig) -> Arc<Self> {
        let (change_tx, _) = watch::channel(None);
        let process_refresh = config.process_refresh_interval;
        Arc::new(Self {
            query,
            config,
            cached: Mutex::new(CacheCell {
                snapshot: None,
                fetched_at: None,
            }),
            processes: Mutex::new(ProcessIndex::new(process_refresh)),
            change_tx,
            debounce_task: Mutex::new(None),
            poll_task: Mutex::new(None),
        })
    }

    /// Latest foreground window, or `None` if no snapshot has ever been
    /// obtained. Never fails: on poll errors the last known snapshot is
    /// returned instead.
    pub async fn active_window(&self) -> Option<WindowSnapshot> {
        {
            let cell = self.cached.lock().await;
            if let (Some(snapshot), Some(at)) = (&cell.snapshot, cell.fetched_at) {
                if at.elapsed() < self.config.cache_ttl {
                    return Some(snapshot.clone());
                }
            }
        }

        let query = Arc::clone(&self.query);
        let polled = retry_with_backoff(
            "window poll",
            self.config.max_attempts,
            Backoff::Exponential(self.config.retry_backoff),
            |_| {
                let query = Arc::clone(&query);
                async move { query.active_window().await }
            },
        )
        .await;

        let metadata = match polled {
            Ok(metadata) if metadata.bounds.is_valid() => metadata,
            Ok(metadata) => {
                warn!(
                    "rejecting window snapshot with invalid bounds: {:?}",
                    metadata.bounds
                );
                return self.last_known().await;
            }
            Err(err) => {
                warn!("window poll failed, serving last known snapshot: {err:#}");
                return self.last_known().await;
            }
        };

        let process_name = self
            .processes
            .lock()
            .await
            .process_name_for(&metadata.app_name);

        let snapshot = WindowSnapshot {
            app_name: metadata.app_name,
            window_title: metadata.window_title,
            process_name,
            bounds: metadata.bounds,
            timestamp: Utc::now(),
        };

        let previous = {
            let mut cell = self.cached.lock().await;
            let previous = cell.snapshot.replace(snapshot.clone());
            cell.fetched_at = Some(Instant::now());
            previous
        };

        match previous {
            Some(prev) if snapshot.differs_from(&prev) => {
                debug!(
                    "window switch: \"{}\" -> \"{}\"",
                    prev.app_name, snapshot.app_name
                );
                self.schedule_change_announcement(snapshot.clone()).await;
            }
            None => {
                info!(
                    "first window detection: \"{}\" - \"{}\"",
                    snapshot.app_name, snapshot.window_title
                );
            }
            _ => {}
        }

        Some(snapshot)
    }

    /// Debounced window-change events. Holds the most recent announced
    /// snapshot; subscribers react to `changed()`.
    pub fn changes(&self) -> watch::Receiver<Option<WindowSnapshot>> {
        self.change_tx.subscribe()
    }

    /// Starts the background poll loop. Idempotent.
    pub async fn start(self: Arc<Self>) {
        let mut slot = self.poll_task.lock().await;
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let observer = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(observer.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = observer.active_window().await;
                    }
                    _ = token.cancelled() => {
                        debug!("window poll loop shutting down");
                        break;
                    }
                }
            }
        });

        *slot = Some((cancel, handle));
    }

    pub async fn stop(&self) {
        if let Some((cancel, handle)) = self.poll_task.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        if let Some(task) = self.debounce_task.lock().await.take() {
            task.abort();
        }
    }

    /// Drops the cached snapshot so the next call polls fresh. Used at
    /// session boundaries to avoid stale window references.
    pub async fn clear_cache(&self) {
        let mut cell = self.cached.lock().await;
        cell.snapshot = None;
        cell.fetched_at = None;
    }

    async fn last_known(&self) -> Option<WindowSnapshot> {
        self.cached.lock().await.snapshot.clone()
    }

    async fn schedule_change_announcement(&self, snapshot: WindowSnapshot) {
        let mut slot = self.debounce_task.lock().await;
        if let Some(pending) = slot.take() {
            // Window changed again before the quiet period elapsed; the old
            // announcement is superseded.
            pending.abort();
        }

        let delay = self.config.debounce;
        let tx = self.change_tx.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(
                "announcing window change: \"{}\" - \"{}\"",
                snapshot.app_name, snapshot.window_title
            );
            tx.send_replace(Some(snapshot));
        }));
    }
}

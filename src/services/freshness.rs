//! Decides when usage gets recomputed.
//!
//! The controller prefers filesystem notifications on the log directories,
//! debounced so a burst of writes produces one refresh. When there is nothing
//! to watch, or the watcher reports an error, it falls back to fixed-interval
//! polling and stays there for the rest of its life.

use super::{Refresh, LOG_EXTENSION};
use crate::models::MonitorSettings;
use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Message from a watch backend to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// Something changed; `paths` may be empty when the backend does not know
    Changed { paths: Vec<PathBuf> },
    Error(String),
}

/// A live registration with a watch backend
pub trait WatchHandle: Send {
    fn close(self: Box<Self>);
}

/// Recursive directory observation
pub trait WatchBackend: Send + Sync + 'static {
    fn watch(
        &self,
        dirs: &[PathBuf],
        signals: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn WatchHandle>>;
}

/// [`WatchBackend`] over the platform's recommended `notify` watcher
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

struct NotifyWatch {
    watcher: RecommendedWatcher,
    dirs: Vec<PathBuf>,
}

impl WatchHandle for NotifyWatch {
    fn close(mut self: Box<Self>) {
        for dir in &self.dirs {
            if let Err(e) = self.watcher.unwatch(dir) {
                log::debug!("Failed to unwatch {:?}: {}", dir, e);
            }
        }
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(
        &self,
        dirs: &[PathBuf],
        signals: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn WatchHandle>> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let signal = match res {
                Ok(event) => WatchSignal::Changed { paths: event.paths },
                Err(e) => WatchSignal::Error(e.to_string()),
            };
            let _ = signals.send(signal);
        })
        .context("creating file watcher")?;

        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", dir.display()))?;
            log::info!("Watching directory for changes: {:?}", dir);
        }

        Ok(Box::new(NotifyWatch {
            watcher,
            dirs: dirs.to_vec(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessMode {
    Idle,
    Watching,
    Polling,
    Stopped,
}

impl FreshnessMode {
    /// Allowed edges. Polling never goes back to watching.
    pub fn can_transition_to(self, next: FreshnessMode) -> bool {
        use FreshnessMode::*;
        matches!(
            (self, next),
            (Idle, Watching) | (Idle, Polling) | (Watching, Polling) | (_, Stopped)
        ) && self != Stopped
    }
}

/// Whether a change event can affect the session logs.
///
/// Events without a path, or touching a `.jsonl` file or an extensionless
/// path (typically a directory), are relevant. Paths with any other
/// extension are not.
pub fn is_relevant_change(paths: &[PathBuf]) -> bool {
    paths.is_empty()
        || paths.iter().any(|path| match path.extension() {
            None => true,
            Some(ext) => ext == LOG_EXTENSION,
        })
}

struct ControllerState {
    mode: FreshnessMode,
    watch: Option<Box<dyn WatchHandle>>,
    pump: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
    debounce_generation: u64,
    poll: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn transition(&mut self, next: FreshnessMode) -> bool {
        if !self.mode.can_transition_to(next) {
            return false;
        }
        log::info!("Freshness mode {:?} -> {:?}", self.mode, next);
        self.mode = next;
        true
    }

    fn close_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.close();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct Shared<R: Refresh> {
    target: Arc<R>,
    backend: Box<dyn WatchBackend>,
    debounce: Duration,
    poll_interval: Duration,
    state: Mutex<ControllerState>,
}

/// Owns the watch-or-poll decision for one set of log directories
pub struct FreshnessController<R: Refresh> {
    shared: Arc<Shared<R>>,
}

impl<R: Refresh> Clone for FreshnessController<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Refresh> FreshnessController<R> {
    pub fn new(target: Arc<R>, backend: impl WatchBackend, settings: &MonitorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                backend: Box::new(backend),
                debounce: settings.debounce,
                poll_interval: settings.poll_interval,
                state: Mutex::new(ControllerState {
                    mode: FreshnessMode::Idle,
                    watch: None,
                    pump: None,
                    debounce: None,
                    debounce_generation: 0,
                    poll: None,
                }),
            }),
        }
    }

    pub fn mode(&self) -> FreshnessMode {
        self.shared.state.lock().mode
    }

    pub fn has_poll_timer(&self) -> bool {
        self.shared.state.lock().poll.is_some()
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.shared.state.lock().debounce.is_some()
    }

    /// Begin watching `log_dirs`, or polling when there is nothing to watch
    /// or the watch cannot be registered. Must be called within a tokio
    /// runtime. Only the first call has an effect.
    pub fn start(&self, log_dirs: Vec<PathBuf>) {
        if self.mode() != FreshnessMode::Idle {
            log::debug!("Freshness controller already started");
            return;
        }

        if log_dirs.is_empty() {
            log::info!("No log directories to watch; polling instead");
            self.start_polling();
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = match self.shared.backend.watch(&log_dirs, tx) {
            Ok(watch) => watch,
            Err(e) => {
                log::warn!("File watching unavailable, falling back to polling: {e:#}");
                self.start_polling();
                return;
            }
        };

        let mut state = self.shared.state.lock();
        if !state.transition(FreshnessMode::Watching) {
            watch.close();
            return;
        }
        state.watch = Some(watch);

        let controller = self.clone();
        state.pump = Some(tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                controller.handle_signal(signal);
            }
        }));
    }

    pub fn handle_signal(&self, signal: WatchSignal) {
        match signal {
            WatchSignal::Changed { paths } => self.notify_change(&paths),
            WatchSignal::Error(message) => {
                log::warn!("File watcher error, switching to polling: {}", message);
                self.start_polling();
            }
        }
    }

    /// Feed one change event; relevant events schedule a debounced refresh
    pub fn notify_change(&self, paths: &[PathBuf]) {
        if self.mode() != FreshnessMode::Watching {
            return;
        }
        if !is_relevant_change(paths) {
            log::debug!("Ignoring change to {:?}", paths);
            return;
        }
        self.schedule_refresh();
    }

    /// Replace any pending refresh with one firing after the debounce window
    pub fn schedule_refresh(&self) {
        let mut state = self.shared.state.lock();
        if state.mode == FreshnessMode::Stopped {
            return;
        }
        if let Some(pending) = state.debounce.take() {
            pending.abort();
        }
        state.debounce_generation += 1;
        let generation = state.debounce_generation;

        let shared = Arc::clone(&self.shared);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.debounce).await;
            {
                let mut state = shared.state.lock();
                if state.debounce_generation != generation
                    || state.mode == FreshnessMode::Stopped
                {
                    return;
                }
                state.debounce = None;
            }
            shared.target.refresh().await;
        }));
    }

    /// Switch to interval polling, closing any active watcher.
    /// A no-op while a poll timer already exists.
    pub fn start_polling(&self) {
        let mut state = self.shared.state.lock();
        if state.poll.is_some() {
            log::debug!("Polling already active");
            return;
        }
        if !state.transition(FreshnessMode::Polling) {
            return;
        }
        state.close_watch();

        let period = self.shared.poll_interval;
        let target = Arc::clone(&self.shared.target);
        state.poll = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                target.refresh().await;
            }
        }));
        log::info!("Polling for usage changes every {:?}", period);
    }

    /// Close watchers and cancel every timer; nothing refreshes afterwards
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.transition(FreshnessMode::Stopped);
        state.close_watch();
        if let Some(pending) = state.debounce.take() {
            pending.abort();
        }
        if let Some(poll) = state.poll.take() {
            poll.abort();
        }
    }
}

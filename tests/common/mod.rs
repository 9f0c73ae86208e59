#![allow(dead_code)]

use anyhow::{anyhow, Result};
use claude_usage_monitor::services::freshness::{WatchBackend, WatchHandle, WatchSignal};
use claude_usage_monitor::services::{Refresh, UsageLoader, LOG_SUBDIR};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Loader returning a canned result
pub struct FakeLoader {
    pub dirs: Vec<PathBuf>,
    pub output: Mutex<Result<Value, String>>,
    pub calls: AtomicUsize,
}

impl FakeLoader {
    pub fn new(dirs: Vec<PathBuf>, output: Value) -> Self {
        Self {
            dirs,
            output: Mutex::new(Ok(output)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(dirs: Vec<PathBuf>, message: &str) -> Self {
        Self {
            dirs,
            output: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_output(&self, output: Value) {
        *self.output.lock() = Ok(output);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UsageLoader for FakeLoader {
    fn base_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }

    fn load_blocks(&self, _base_dirs: &[PathBuf]) -> impl Future<Output = Result<Value>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = self.output.lock().clone();
        async move { output.map_err(|e| anyhow!(e)) }
    }
}

/// Shared loader handle so a test can keep changing the output
#[derive(Clone)]
pub struct SharedLoader(pub Arc<FakeLoader>);

impl UsageLoader for SharedLoader {
    fn base_dirs(&self) -> Vec<PathBuf> {
        self.0.base_dirs()
    }

    fn load_blocks(&self, base_dirs: &[PathBuf]) -> impl Future<Output = Result<Value>> + Send {
        self.0.load_blocks(base_dirs)
    }
}

/// Refresh target that records when it fired
#[derive(Default)]
pub struct CountingRefresh {
    count: AtomicUsize,
    fired_at: Mutex<Vec<Instant>>,
}

impl CountingRefresh {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn fired_at(&self) -> Vec<Instant> {
        self.fired_at.lock().clone()
    }
}

impl Refresh for CountingRefresh {
    fn refresh(&self) -> impl Future<Output = ()> + Send {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.fired_at.lock().push(Instant::now());
        async {}
    }
}

#[derive(Default)]
pub struct BackendState {
    pub fail: bool,
    pub watch_calls: AtomicUsize,
    pub closed: Arc<AtomicBool>,
    pub sender: Mutex<Option<mpsc::UnboundedSender<WatchSignal>>>,
}

/// Watch backend driven by the test
#[derive(Clone, Default)]
pub struct FakeBackend(pub Arc<BackendState>);

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self(Arc::new(BackendState {
            fail: true,
            ..BackendState::default()
        }))
    }

    pub fn send(&self, signal: WatchSignal) {
        if let Some(sender) = self.0.sender.lock().as_ref() {
            let _ = sender.send(signal);
        }
    }

    pub fn watch_calls(&self) -> usize {
        self.0.watch_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

struct FakeWatch {
    closed: Arc<AtomicBool>,
}

impl WatchHandle for FakeWatch {
    fn close(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl WatchBackend for FakeBackend {
    fn watch(
        &self,
        _dirs: &[PathBuf],
        signals: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn WatchHandle>> {
        self.0.watch_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail {
            return Err(anyhow!("recursive watch not supported"));
        }
        *self.0.sender.lock() = Some(signals);
        Ok(Box::new(FakeWatch {
            closed: Arc::clone(&self.0.closed),
        }))
    }
}

/// Create `<root>/<name>/projects` and return `<root>/<name>`
pub fn base_with_logs(root: &Path, name: &str) -> PathBuf {
    let base = root.join(name);
    std::fs::create_dir_all(base.join(LOG_SUBDIR)).unwrap();
    base
}

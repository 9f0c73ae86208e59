use super::broadcaster::{ChangeBroadcaster, UsageEvent};
use super::config_store::ConfigStore;
use super::freshness::{FreshnessController, FreshnessMode, NotifyBackend, WatchBackend};
use super::snapshot::SnapshotComputer;
use super::UsageLoader;
use crate::models::*;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Wires config, snapshot computation, freshness and broadcasting together
pub struct UsageMonitorService<L: UsageLoader> {
    broadcaster: Arc<ChangeBroadcaster<L>>,
    controller: FreshnessController<ChangeBroadcaster<L>>,
    settings: MonitorSettings,
}

impl<L: UsageLoader> UsageMonitorService<L> {
    pub fn new(loader: L, config: ConfigStore, settings: MonitorSettings) -> Self {
        Self::with_backend(loader, config, settings, NotifyBackend)
    }

    pub fn with_backend(
        loader: L,
        config: ConfigStore,
        settings: MonitorSettings,
        backend: impl WatchBackend,
    ) -> Self {
        let computer = SnapshotComputer::new(Arc::new(loader), config);
        let broadcaster = Arc::new(ChangeBroadcaster::new(computer));
        let controller = FreshnessController::new(Arc::clone(&broadcaster), backend, &settings);
        Self {
            broadcaster,
            controller,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn freshness_mode(&self) -> FreshnessMode {
        self.controller.mode()
    }

    /// Start keeping usage fresh and publish the first snapshot.
    /// Does nothing when disabled or already started.
    pub async fn start(&self) {
        if !self.settings.enabled {
            log::info!("Usage monitor disabled; not starting");
            return;
        }
        if self.controller.mode() != FreshnessMode::Idle {
            return;
        }

        let log_dirs = self.broadcaster.computer().log_dirs();
        log::info!("Starting usage monitor for {:?}", log_dirs);
        self.controller.start(log_dirs);
        self.broadcaster.refresh_and_broadcast().await;
    }

    pub fn stop(&self) {
        self.controller.stop();
        log::info!("Stopped usage monitor");
    }

    /// Freshly computed snapshot; does not affect broadcast deduplication
    pub async fn current_snapshot(&self) -> UsageSnapshot {
        self.broadcaster.computer().compute().await
    }

    pub fn last_broadcast(&self) -> Option<UsageSnapshot> {
        self.broadcaster.last_broadcast()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.broadcaster.subscribe()
    }

    /// Force a recompute outside the freshness schedule
    pub async fn refresh(&self) -> bool {
        self.broadcaster.refresh_and_broadcast().await
    }

    pub fn config(&self) -> UsageMonitorConfig {
        self.config_store().load()
    }

    pub fn derived_limits(&self) -> DerivedLimits {
        self.config_store().derived_limits()
    }

    pub fn set_plan(&self, plan: &str) -> Result<UsageMonitorConfig> {
        let config = self.config_store().set_plan(plan)?;
        self.broadcaster.publish(UsageEvent::ConfigChanged(config.into()));
        Ok(config)
    }

    pub fn set_pro_limit(&self, limit: f64) -> Result<UsageMonitorConfig> {
        let config = self.config_store().set_pro_limit(limit)?;
        self.broadcaster.publish(UsageEvent::ConfigChanged(config.into()));
        Ok(config)
    }

    fn config_store(&self) -> &ConfigStore {
        self.broadcaster.computer().config()
    }
}

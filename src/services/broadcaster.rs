use super::snapshot::SnapshotComputer;
use super::{Refresh, UsageLoader};
use crate::models::*;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use tokio::sync::broadcast;

/// Channel id for snapshot updates
pub const SNAPSHOT_CHANNEL: &str = "usage-monitor:update";
/// Channel id for plan/limit changes
pub const CONFIG_CHANNEL: &str = "usage-monitor:config";

const EVENT_CAPACITY: usize = 64;

/// Payload published to presentation surfaces
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UsageEvent {
    Snapshot(UsageSnapshot),
    ConfigChanged(ConfigChange),
}

impl UsageEvent {
    /// Stable channel identifier for this event
    pub fn channel(&self) -> &'static str {
        match self {
            UsageEvent::Snapshot(_) => SNAPSHOT_CHANNEL,
            UsageEvent::ConfigChanged(_) => CONFIG_CHANNEL,
        }
    }
}

/// Lets open surfaces update their limit without a full recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChange {
    pub plan: PlanType,
    pub limit: u64,
    pub limits: DerivedLimits,
}

impl From<UsageMonitorConfig> for ConfigChange {
    fn from(config: UsageMonitorConfig) -> Self {
        Self {
            plan: config.plan,
            limit: config.limit(),
            limits: config.derived_limits(),
        }
    }
}

/// Decides whether two snapshots count as the same broadcast
pub trait SnapshotEquality: Send + Sync {
    fn same(&self, previous: &UsageSnapshot, next: &UsageSnapshot) -> bool;
}

/// Compares the canonical JSON serialization of both snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct SerializedEquality;

impl SnapshotEquality for SerializedEquality {
    fn same(&self, previous: &UsageSnapshot, next: &UsageSnapshot) -> bool {
        match (serde_json::to_string(previous), serde_json::to_string(next)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Recomputes usage and publishes it only when it changed
pub struct ChangeBroadcaster<L: UsageLoader> {
    computer: SnapshotComputer<L>,
    equality: Box<dyn SnapshotEquality>,
    last: Mutex<Option<UsageSnapshot>>,
    events: broadcast::Sender<UsageEvent>,
}

impl<L: UsageLoader> ChangeBroadcaster<L> {
    pub fn new(computer: SnapshotComputer<L>) -> Self {
        Self::with_equality(computer, SerializedEquality)
    }

    pub fn with_equality(
        computer: SnapshotComputer<L>,
        equality: impl SnapshotEquality + 'static,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            computer,
            equality: Box::new(equality),
            last: Mutex::new(None),
            events,
        }
    }

    pub fn computer(&self) -> &SnapshotComputer<L> {
        &self.computer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.events.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: UsageEvent) {
        let channel = event.channel();
        if self.events.send(event).is_err() {
            log::debug!("No subscribers on {}", channel);
        }
    }

    /// The last snapshot that was broadcast, if any
    pub fn last_broadcast(&self) -> Option<UsageSnapshot> {
        self.last.lock().clone()
    }

    /// Recompute and emit on change. Returns whether an update went out.
    pub async fn refresh_and_broadcast(&self) -> bool {
        let snapshot = self.computer.compute().await;
        {
            let mut last = self.last.lock();
            if let Some(previous) = last.as_ref() {
                if self.equality.same(previous, &snapshot) {
                    return false;
                }
            }
            *last = Some(snapshot.clone());
        }
        log::debug!(
            "Usage changed: {:?} {} / {}",
            snapshot.status,
            snapshot.total_tokens,
            snapshot.limit
        );
        self.publish(UsageEvent::Snapshot(snapshot));
        true
    }
}

impl<L: UsageLoader> Refresh for ChangeBroadcaster<L> {
    fn refresh(&self) -> impl Future<Output = ()> + Send {
        async move {
            self.refresh_and_broadcast().await;
        }
    }
}

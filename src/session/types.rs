use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::config::{
    DEFAULT_LAST_SEEN_INTERVAL_SECS, DEFAULT_SLEEP_TIMEOUT_SECS, DEFAULT_UPDATE_THROTTLE_SECS,
};

/// Configuration knobs recognized by the coordinator. Constructed by the
/// caller; nothing in the core parses a config file or environment on its
/// own.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the trainer may report no activity before a bike-data
    /// packet is treated as a "sleep" packet. Zero disables sleep
    /// detection entirely.
    pub sleep_timeout: Duration,
    /// Minimum spacing between bare `last_seen` publishes while asleep.
    pub last_seen_interval: Duration,
    /// Minimum spacing between full telemetry publishes. Zero means
    /// every merge publishes immediately.
    pub update_throttle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sleep_timeout: Duration::from_secs(DEFAULT_SLEEP_TIMEOUT_SECS),
            last_seen_interval: Duration::from_secs(DEFAULT_LAST_SEEN_INTERVAL_SECS),
            update_throttle: Duration::from_secs(DEFAULT_UPDATE_THROTTLE_SECS),
        }
    }
}

/// A merged telemetry snapshot: the latest value of every metric the
/// coordinator has observed, plus the wall-clock time it was last touched.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub metrics: HashMap<String, f64>,
    pub last_seen: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }
}

/// The three monotonic clocks the coordinator's telemetry-ingestion rule
/// reads and advances. Kept together behind one lock since every ingestion
/// step reads or writes more than one of them.
pub(super) struct Clocks {
    pub last_activity_monotonic: tokio::time::Instant,
    pub last_publish_monotonic: tokio::time::Instant,
    pub last_seen_publish_monotonic: tokio::time::Instant,
}

impl Clocks {
    fn new(now: tokio::time::Instant) -> Self {
        Self {
            last_activity_monotonic: now,
            last_publish_monotonic: now,
            last_seen_publish_monotonic: now,
        }
    }
}

/// Shared telemetry state: the merged snapshot, the activity/publish
/// clocks, and the broadcast channel consumers subscribe to. Lives behind
/// an `Arc` so the transport's notification callback can reach it without
/// taking the coordinator's own session mutex.
pub(super) struct TelemetryState {
    pub config: SessionConfig,
    pub snapshot: Mutex<HashMap<String, f64>>,
    pub last_seen_wall: Mutex<DateTime<Utc>>,
    pub clocks: Mutex<Clocks>,
    pub publisher: broadcast::Sender<TelemetrySnapshot>,
}

impl TelemetryState {
    pub fn new(config: SessionConfig) -> Self {
        let (publisher, _) = broadcast::channel(32);
        Self {
            config,
            snapshot: Mutex::new(HashMap::new()),
            last_seen_wall: Mutex::new(Utc::now()),
            clocks: Mutex::new(Clocks::new(tokio::time::Instant::now())),
            publisher,
        }
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            metrics: self.snapshot.lock().await.clone(),
            last_seen: *self.last_seen_wall.lock().await,
        }
    }
}

//! The stable surface exposed to a host application: six named commands,
//! connect/disconnect, and a telemetry snapshot/subscription.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::SessionError;
use crate::session::coordinator::Coordinator;
use crate::session::types::{SessionConfig, TelemetrySnapshot, TelemetryState};

/// A client session to one WFTNP/FTMS trainer. Cheaply `Clone`-able —
/// clones share the same underlying coordinator and telemetry state.
#[derive(Clone)]
pub struct WahooSession {
    coordinator: Arc<Mutex<Coordinator>>,
    telemetry: Arc<TelemetryState>,
}

impl WahooSession {
    /// Builds a session targeting `host:port`. Nothing is connected yet —
    /// call [`WahooSession::connect`].
    pub fn new(host: impl Into<String>, port: u16, config: SessionConfig) -> Self {
        let telemetry = Arc::new(TelemetryState::new(config));
        let coordinator = Coordinator::new(host.into(), port, telemetry.clone());
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
            telemetry,
        }
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.connect().await
    }

    pub async fn disconnect(&self) {
        self.coordinator.lock().await.disconnect().await
    }

    pub async fn set_erg_watts(&self, watts: i32) -> Result<(), SessionError> {
        self.coordinator.lock().await.set_erg_watts(watts).await
    }

    pub async fn set_grade(
        &self,
        grade_percent: f32,
        wind_mps: f32,
        crr: f32,
        cw: f32,
    ) -> Result<(), SessionError> {
        self.coordinator
            .lock()
            .await
            .set_grade(grade_percent, wind_mps, crr, cw)
            .await
    }

    /// Convenience overload matching the documented defaults
    /// (`wind_mps=0, crr=0.0040, cw=0.510`).
    pub async fn set_grade_default_rolling(&self, grade_percent: f32) -> Result<(), SessionError> {
        self.set_grade(grade_percent, 0.0, 0.0040, 0.510).await
    }

    pub async fn request_control(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.request_control().await
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.reset().await
    }

    pub async fn start_training(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.start_training().await
    }

    pub async fn stop_training(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.stop_training().await
    }

    /// Drives the periodic liveness probe. The caller owns the timer
    /// (e.g. a `tokio::time::interval` loop) — the coordinator itself
    /// never spawns its own background task.
    pub async fn tick(&self) -> Result<(), SessionError> {
        self.coordinator.lock().await.tick().await
    }

    pub async fn connected(&self) -> bool {
        self.coordinator.lock().await.connected()
    }

    pub async fn manually_disconnected(&self) -> bool {
        self.coordinator.lock().await.manually_disconnected()
    }

    pub async fn has_control(&self) -> bool {
        self.coordinator.lock().await.has_control()
    }

    /// The latest merged telemetry snapshot. Reads don't contend with the
    /// session mutex — the snapshot lives in its own lock.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot().await
    }

    /// A stream of snapshot updates, one per publish.
    pub fn subscribe(&self) -> impl Stream<Item = TelemetrySnapshot> {
        BroadcastStream::new(self.telemetry.publisher.subscribe()).filter_map(|r| r.ok())
    }
}

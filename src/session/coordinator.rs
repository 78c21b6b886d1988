//! Connect/reconnect supervisor, lazy control acquisition, activity/sleep
//! detection, and publish throttling for one trainer session.

use std::sync::Arc;

use chrono::Utc;
use log::{error, warn};

use crate::config::LIVENESS_PROBE_TIMEOUT;
use crate::error::{SessionError, TransportError};
use crate::session::types::{SessionConfig, TelemetryState};
use crate::wftnp::frame::MessageType;
use crate::wftnp::transport::NotificationCallback;
use crate::wftnp::{uuid16, Ftms, Transport};

/// Owns the transport, the FTMS profile, and the session state for one
/// trainer. All mutating operations go through `&mut self`; callers are
/// expected to serialize access behind a mutex (see `session::facade`).
pub struct Coordinator {
    host: String,
    port: u16,
    transport: Option<Transport>,
    ftms: Option<Ftms>,
    connected: bool,
    manually_disconnected: bool,
    has_control: bool,
    reconnect_notice_logged: bool,
    telemetry: Arc<TelemetryState>,
}

impl Coordinator {
    pub fn new(host: String, port: u16, telemetry: Arc<TelemetryState>) -> Self {
        Self {
            host,
            port,
            transport: None,
            ftms: None,
            connected: false,
            manually_disconnected: false,
            has_control: false,
            reconnect_notice_logged: false,
            telemetry,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn manually_disconnected(&self) -> bool {
        self.manually_disconnected
    }

    pub fn has_control(&self) -> bool {
        self.has_control
    }

    /// Closes any existing transport, reopens, and runs FTMS
    /// initialization with `subscribe_bike=true`. Control is never
    /// acquired here — that stays lazy, via `ensure_control`.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.manually_disconnected = false;
        self.teardown().await;

        let transport = Transport::connect(&self.host, self.port).await?;
        transport
            .set_notification_callback(make_notification_callback(self.telemetry.clone()))
            .await;

        let mut ftms = Ftms::new(transport.clone());
        if let Err(e) = ftms.initialize(true, false).await {
            transport.close().await;
            return Err(e.into());
        }

        self.transport = Some(transport);
        self.ftms = Some(ftms);
        self.connected = true;
        self.has_control = false;
        Ok(())
    }

    /// User-initiated disconnect. While this flag is set the periodic
    /// tick never reconnects and every mutating command is rejected.
    pub async fn disconnect(&mut self) {
        self.manually_disconnected = true;
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.ftms = None;
        self.connected = false;
    }

    fn ftms_ref(&self) -> Result<&Ftms, SessionError> {
        self.ftms
            .as_ref()
            .ok_or(SessionError::Transport(TransportError::Closed))
    }

    /// No-op if control is already held; otherwise `request_control` then
    /// `start_or_resume`. The single integration point where the facade's
    /// mutating commands acquire control — never eagerly.
    pub async fn ensure_control(&mut self) -> Result<(), SessionError> {
        if self.manually_disconnected {
            return Err(SessionError::ManuallyDisconnected);
        }
        if self.has_control {
            return Ok(());
        }
        let ftms = self.ftms_ref()?;
        ftms.request_control()
            .await
            .map_err(SessionError::ControlUnavailable)?;
        ftms.start_or_resume()
            .await
            .map_err(SessionError::ControlUnavailable)?;
        self.has_control = true;
        Ok(())
    }

    pub async fn request_control(&mut self) -> Result<(), SessionError> {
        self.ensure_control().await
    }

    pub async fn start_training(&mut self) -> Result<(), SessionError> {
        self.ensure_control().await
    }

    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_control().await?;
        self.ftms_ref()?.reset().await.map_err(SessionError::from)
    }

    pub async fn stop_training(&mut self) -> Result<(), SessionError> {
        self.ensure_control().await?;
        self.ftms_ref()?
            .stop_or_pause()
            .await
            .map_err(SessionError::from)
    }

    pub async fn set_erg_watts(&mut self, watts: i32) -> Result<(), SessionError> {
        self.ensure_control().await?;
        self.ftms_ref()?
            .set_target_power(watts)
            .await
            .map_err(SessionError::from)
    }

    pub async fn set_grade(
        &mut self,
        grade_percent: f32,
        wind_mps: f32,
        crr: f32,
        cw: f32,
    ) -> Result<(), SessionError> {
        self.ensure_control().await?;
        self.ftms_ref()?
            .set_simulation_parameters(grade_percent, wind_mps, crr, cw)
            .await
            .map_err(SessionError::from)
    }

    /// One liveness check: a lightweight `discover_services` bounded by
    /// `LIVENESS_PROBE_TIMEOUT`. On timeout or error the transport is
    /// closed and exactly one reconnect is attempted; failure there is
    /// surfaced as `UpdateFailed`. A no-op while manually disconnected.
    pub async fn tick(&mut self) -> Result<(), SessionError> {
        if self.manually_disconnected {
            return Ok(());
        }

        match self.probe_once().await {
            Ok(()) => {
                self.reconnect_notice_logged = false;
                Ok(())
            }
            Err(e) => {
                warn!("liveness probe failed: {e}");
                self.teardown().await;
                match self.connect().await {
                    Ok(()) => {
                        self.reconnect_notice_logged = false;
                        Ok(())
                    }
                    Err(reconnect_err) => {
                        if !self.reconnect_notice_logged {
                            error!("reconnect failed: {reconnect_err}");
                            self.reconnect_notice_logged = true;
                        }
                        Err(SessionError::UpdateFailed(reconnect_err.to_string()))
                    }
                }
            }
        }
    }

    async fn probe_once(&self) -> Result<(), SessionError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(SessionError::Transport(TransportError::Closed))?;
        let result = tokio::time::timeout(
            LIVENESS_PROBE_TIMEOUT,
            transport.request(MessageType::DiscoverServices, vec![]),
        )
        .await;
        match result {
            Ok(inner) => inner.map(|_| ()).map_err(SessionError::from),
            Err(_) => Err(SessionError::Transport(TransportError::Timeout {
                what: "liveness probe",
            })),
        }
    }
}

fn make_notification_callback(telemetry: Arc<TelemetryState>) -> NotificationCallback {
    Arc::new(move |uuid, value| {
        let telemetry = telemetry.clone();
        Box::pin(async move {
            if uuid == uuid16::INDOOR_BIKE_DATA {
                ingest_indoor_bike(&telemetry, &value).await;
            }
        })
    })
}

/// Implements spec §4.F's telemetry ingestion rule: sleep detection,
/// activity-timestamp advancement, and throttled publishing.
async fn ingest_indoor_bike(state: &TelemetryState, payload: &[u8]) {
    let metrics = crate::wftnp::indoor_bike::decode(payload);
    let now = tokio::time::Instant::now();
    let has_activity = ["speed_kmh", "cadence_rpm", "power_w"]
        .iter()
        .any(|k| metrics.get(*k).copied().unwrap_or(0.0) > 0.0);

    let mut clocks = state.clocks.lock().await;
    let sleep_timeout = state.config.sleep_timeout;
    let sleeping = !sleep_timeout.is_zero()
        && now.saturating_duration_since(clocks.last_activity_monotonic) >= sleep_timeout
        && !has_activity;

    if sleeping {
        let elapsed_since_last_seen =
            now.saturating_duration_since(clocks.last_seen_publish_monotonic);
        if elapsed_since_last_seen >= state.config.last_seen_interval {
            clocks.last_seen_publish_monotonic = now;
            drop(clocks);
            *state.last_seen_wall.lock().await = Utc::now();
            publish(state).await;
        }
        return;
    }

    if has_activity {
        clocks.last_activity_monotonic = now;
    }
    drop(clocks);

    {
        let mut snapshot = state.snapshot.lock().await;
        snapshot.extend(metrics);
    }
    *state.last_seen_wall.lock().await = Utc::now();

    let mut clocks = state.clocks.lock().await;
    let update_throttle = state.config.update_throttle;
    let throttled = !update_throttle.is_zero()
        && now.saturating_duration_since(clocks.last_publish_monotonic) < update_throttle;
    if throttled {
        return;
    }
    clocks.last_publish_monotonic = now;
    clocks.last_seen_publish_monotonic = now;
    drop(clocks);

    publish(state).await;
}

async fn publish(state: &TelemetryState) {
    let snapshot = state.snapshot().await;
    // No receivers is the common case between `subscribe()` calls; the
    // error carries the dropped value back, which we don't need.
    let _ = state.publisher.send(snapshot);
}

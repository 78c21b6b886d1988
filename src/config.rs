use std::time::Duration;

/// mDNS service type advertised by WFTNP-capable trainers.
pub const MDNS_SERVICE_TYPE: &str = "_wahoo-fitness-tnp._tcp.local.";

/// Fallback TCP port when discovery doesn't supply one (spec.md §9 open question:
/// both 5555 and 36866 are observed in the wild — never hard-code, prefer the
/// discovered port and fall back to this only for user-supplied config).
pub const DEFAULT_PORT: u16 = 5555;

/// Default mDNS browse window.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

/// Control-point indication timeout (spec.md §5).
pub const CONTROL_POINT_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness probe timeout (spec.md §5).
pub const LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Liveness probe interval — how often the coordinator's periodic tick fires.
pub const LIVENESS_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Default session coordinator knobs (spec.md §6).
pub const DEFAULT_SLEEP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LAST_SEEN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_UPDATE_THROTTLE_SECS: u64 = 0;

/// Target power clamp range (spec.md §4.D).
pub const TARGET_POWER_RANGE: (i32, i32) = (0, 600);

/// Simulation-parameter clamp ranges (spec.md §4.D).
pub const GRADE_RANGE_PERCENT: (f32, f32) = (-10.0, 15.0);
pub const WIND_RANGE_MPS: (f32, f32) = (-50.0, 50.0);
pub const CRR_RANGE: (f32, f32) = (0.0, 0.0255);
pub const CW_RANGE: (f32, f32) = (0.0, 2.55);

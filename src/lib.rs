//! Client library for the Wahoo Fitness Thin Network Protocol (WFTNP) and
//! the Fitness Machine Service (FTMS) profile layered on top of it.
//!
//! [`WahooSession`] is the stable entry point: discover a trainer with
//! [`wftnp::discovery`], then build a session and drive it.

pub mod config;
pub mod error;
pub mod session;
pub mod wftnp;

pub use error::WahooError;
pub use session::{SessionConfig, TelemetrySnapshot, WahooSession};
pub use wftnp::DiscoveredDevice;

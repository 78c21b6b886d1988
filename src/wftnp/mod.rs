//! Wahoo Fitness Thin Network Protocol: frame codec, discovery, and transport.

pub mod discovery;
pub mod frame;
pub mod ftms;
pub mod indoor_bike;
pub mod transport;
pub mod uuid16;

pub use discovery::DiscoveredDevice;
pub use frame::{Frame, MessageType};
pub use ftms::Ftms;
pub use transport::{NotificationCallback, Transport};

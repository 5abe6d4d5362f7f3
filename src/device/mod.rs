//! UPS device module
//!
//! - `poller`: Per-device poll loop and lifecycle hooks
//! - `pairing`: Discovery of the UPS units a server offers

pub mod pairing;
pub mod poller;

pub use pairing::discover_devices;
pub use poller::UpsDevice;

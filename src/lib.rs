//! Proxy Sentinel - live proxy identity monitor
//!
//! Continuously probes a pool of proxies, tracks the public IP each one
//! exits from, and flags rotations and IPs shared between proxies.

pub mod error;
pub mod logging;
pub mod monitor;
pub mod proxy;
pub mod tui;

pub use monitor::*;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

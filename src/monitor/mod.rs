//! Monitoring core
//!
//! This module provides:
//! - The cross-session IP tracker used for duplicate detection
//! - The per-proxy session state machine
//! - The scheduler driving one check loop per session
//! - A headless reporter for running without the TUI

pub mod report;
pub mod scheduler;
pub mod session;
pub mod tracker;

pub use scheduler::{RetryPolicy, Scheduler, SchedulerConfig};
pub use session::{derive_display_status, DisplayStatus, ProxySession, SessionSnapshot, SessionStatus};
pub use tracker::IpTracker;

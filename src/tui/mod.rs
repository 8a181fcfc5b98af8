//! TUI module for the live monitoring display

pub mod format;
mod monitor_view;

pub use monitor_view::MonitorApp;

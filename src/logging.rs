//! Tracing setup
//!
//! Logs always go to a daily rolling file. The stdout layer is only added
//! in headless mode, since the TUI owns the terminal.

use crate::Result;
use anyhow::Context;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "proxy_sentinel=info";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub directory: PathBuf,
    pub file_name: String,
    pub rotation: Rotation,
    /// Mirror events to stdout
    pub stdout: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "proxy-sentinel.log".to_string(),
            rotation: Rotation::DAILY,
            stdout: false,
        }
    }
}

impl LoggerConfig {
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_stdout(mut self, stdout: bool) -> Self {
        self.stdout = stdout;
        self
    }
}

/// Install the global subscriber.
///
/// Logging never stops the monitor: when the file appender cannot be set
/// up, the file layer is skipped with a warning on stderr. Returns whether
/// the file layer is active.
pub fn init_logging(config: LoggerConfig) -> bool {
    let file_appender = match file_appender(&config) {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("warning: file logging disabled: {:#}", e);
            None
        }
    };
    let file_enabled = file_appender.is_some();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let file_layer = file_appender.map(|appender| {
        fmt::layer()
            .with_writer(appender)
            .with_target(true)
            .with_ansi(false)
    });

    let stdout_layer = config
        .stdout
        .then(|| fmt::layer().with_target(false).with_ansi(true));

    if let Err(e) = Registry::default()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
    {
        eprintln!("warning: failed to set global subscriber: {}", e);
    }

    file_enabled
}

fn file_appender(config: &LoggerConfig) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;

    RollingFileAppender::builder()
        .rotation(config.rotation.clone())
        .filename_prefix(&config.file_name)
        .build(&config.directory)
        .with_context(|| format!("failed to open log file in {}", config.directory.display()))
}

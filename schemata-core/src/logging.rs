//! Logging bootstrap.
//!
//! Library code only emits `tracing` events. Binaries call [`init`] once to
//! install a subscriber configured from the environment:
//!
//! - `SCHEMATA_DEBUG=true|1|yes` - enable debug logging
//! - `SCHEMATA_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `SCHEMATA_LOG_FORMAT=json|pretty|compact` - output format (default: compact)
//!
//! Without either of the first two variables nothing is installed, so an
//! application that brings its own subscriber is left alone.
//!
//! ```rust,no_run
//! schemata_core::logging::init();
//! ```
//!
//! The subscriber itself requires the `tracing-subscriber` feature.

use std::env;
use std::fmt;
use std::sync::Once;

static INIT: Once = Once::new();

/// Enables debug logging when truthy.
pub const DEBUG_VAR: &str = "SCHEMATA_DEBUG";
/// Explicit log level.
pub const LEVEL_VAR: &str = "SCHEMATA_LOG_LEVEL";
/// Output format.
pub const FORMAT_VAR: &str = "SCHEMATA_LOG_FORMAT";

/// Crates whose events the installed filter lets through.
const TARGETS: [&str; 5] = [
    "schemata",
    "schemata_core",
    "schemata_postgres",
    "schemata_axum",
    "schemata_cli",
];

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    #[default]
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Maximum level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn",
            format: LogFormat::Compact,
        }
    }
}

impl fmt::Display for LogSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.level, self.format)
    }
}

impl LogSettings {
    /// Settings with an explicit level.
    pub fn with_level(level: &str) -> Self {
        Self {
            level: parse_level(level).unwrap_or("warn"),
            ..Self::default()
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Read the environment. `None` when logging was not requested.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(
            env::var(DEBUG_VAR).ok().as_deref(),
            env::var(LEVEL_VAR).ok().as_deref(),
            env::var(FORMAT_VAR).ok().as_deref(),
        )
    }

    fn from_vars(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Option<Self> {
        let debug = debug.is_some_and(is_truthy);
        if !debug && level.is_none() {
            return None;
        }
        let fallback = if debug { "debug" } else { "warn" };
        Some(Self {
            level: level.and_then(parse_level).unwrap_or(fallback),
            format: format.map(LogFormat::parse).unwrap_or_default(),
        })
    }

    /// Filter directive covering every schemata crate.
    pub fn directive(&self) -> String {
        TARGETS
            .iter()
            .map(|target| format!("{target}={}", self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_level(value: &str) -> Option<&'static str> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Whether `SCHEMATA_DEBUG` is set to a truthy value.
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR).is_ok_and(|v| is_truthy(&v))
}

/// Install a subscriber configured from the environment. Later calls are
/// no-ops.
pub fn init() {
    if let Some(settings) = LogSettings::from_env() {
        init_with(settings);
    }
}

/// Install a subscriber with explicit settings. Later calls, including
/// [`init`], are no-ops.
pub fn init_with(settings: LogSettings) {
    INIT.call_once(|| install(settings));
}

#[cfg(feature = "tracing-subscriber")]
fn install(settings: LogSettings) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(settings.directive()).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(%settings, "logging initialized");
    }
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_settings: LogSettings) {}

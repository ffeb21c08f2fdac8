use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// All crates of this workspace, used to build the default log filter.
const CRATE_NAMES: &[&str] = &[
    "meter",
    "meter_agent",
    "meter_auth",
    "meter_common",
    "meter_config",
    "meter_log",
    "meter_metrics",
    "meter_server",
    "meter_statsd",
    "meter_store",
    "meter_system",
    "meter_threading",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO meter_server::service: restored 12 metrics from snapshot
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-03-04T12:10:32Z  INFO meter_server::service: restored 12 metrics from snapshot
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging level parsed from configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LevelFilter(pub tracing_subscriber::filter::LevelFilter);

impl FromStr for LevelFilter {
    type Err = <tracing_subscriber::filter::LevelFilter as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for LevelFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.to_string().to_lowercase())
    }
}

impl<'de> Deserialize<'de> for LevelFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for meter crates.
    pub level: LevelFilter,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter(Level::INFO.into()),
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Builds the default directives: `info` for third-party crates and the configured level for ours.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::new("info");
    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}={}", level.0).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured level if it is set.
///
/// # Example
///
/// ```
/// let log_config = meter_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// meter_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: called during startup, before any other threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => default_filter(config.level),
    };

    let subscriber = tracing_subscriber::fmt::layer().with_target(true);
    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => subscriber.pretty().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).compact().boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}

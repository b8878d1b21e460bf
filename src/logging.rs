//! Logging configuration for application-context
//!
//! Every event the crate emits uses the `application_context` target:
//! `info` when a context refreshes or closes, `debug` for phases and
//! registrations, `trace` for bean lookups and `warn` for failures that
//! close and cancellation swallow.
//!
//! # Features
//!
//! - `logging` - Emit events through `tracing` (default)
//! - `logging-json` - Install a JSON subscriber (recommended for production)
//! - `logging-pretty` - Install a colorful pretty subscriber (recommended for development)
//!
//! # Example
//!
//! ```rust,ignore
//! use application_context::logging;
//!
//! // Initialize with default settings (JSON if logging-json, pretty if logging-pretty)
//! logging::init();
//!
//! // Or use builder for custom configuration
//! logging::builder()
//!     .with_level(tracing::Level::DEBUG)
//!     .context_only()
//!     .json()
//!     .init();
//!
//! // Or read `logging.level` and `logging.format` from an environment
//! let env = application_context::Environment::new();
//! logging::LoggingBuilder::from_environment(&env).try_init()?;
//! ```
//!
//! A `RUST_LOG` directive, when present, replaces the configured level and
//! target filter.

use crate::environment::Environment;
use std::str::FromStr;
use tracing::Level;

/// Target of every event this crate emits
pub const TARGET: &str = "application_context";

/// Property holding the minimum level (`trace` ... `error`)
pub const LOGGING_LEVEL_PROPERTY: &str = "logging.level";

/// Property holding the format (`json`, `pretty` or `compact`)
pub const LOGGING_FORMAT_PROPERTY: &str = "logging.format";

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging (production default)
    #[default]
    Json,
    /// Pretty colorful output (development)
    Pretty,
    /// Compact single-line output
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Builder for the logging subscriber
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level and format from `logging.level` / `logging.format`; unset or
    /// unparsable values keep the defaults
    pub fn from_environment(env: &Environment) -> Self {
        let mut builder = Self::default();
        if let Some(level) = env
            .get_property(LOGGING_LEVEL_PROPERTY)
            .and_then(|v| Level::from_str(v.trim()).ok())
        {
            builder.level = level;
        }
        if let Some(format) = env
            .get_property(LOGGING_FORMAT_PROPERTY)
            .and_then(|v| v.parse().ok())
        {
            builder.format = format;
        }
        builder
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Filter to only show events from one target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show application-context events
    pub fn context_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The filter directive this builder installs when `RUST_LOG` is unset
    pub fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber; fails if one is already installed
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> crate::Result<()> {
        use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()));

        let (file, line_number, thread_ids, thread_names) =
            (self.with_file, self.with_line_number, self.with_thread_ids, self.with_thread_names);

        macro_rules! configure {
            ($layer:expr) => {
                $layer
                    .with_file(file)
                    .with_line_number(line_number)
                    .with_thread_ids(thread_ids)
                    .with_thread_names(thread_names)
                    .with_target(true)
                    .boxed()
            };
        }

        let layer = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => configure!(fmt::layer().json()),
            // Without the json feature the plain formatter stands in
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => configure!(fmt::layer()),
            LogFormat::Pretty => configure!(fmt::layer().pretty()),
            LogFormat::Compact => configure!(fmt::layer().compact()),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(crate::ContextError::other)
    }

    /// Install the subscriber (no-op without a subscriber feature)
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> crate::Result<()> {
        Ok(())
    }

    /// Install the subscriber, ignoring an already installed one
    pub fn init(self) {
        let _ = self.try_init();
    }
}

/// Create a new logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with default settings
///
/// JSON when `logging-json` is enabled, otherwise pretty.
pub fn init() {
    if cfg!(feature = "logging-json") {
        init_json();
    } else {
        init_pretty();
    }
}

/// Initialize JSON structured logging
///
/// # Example output
/// ```json
/// {"timestamp":"2024-01-01T00:00:00.000Z","level":"INFO","target":"application_context","fields":{"message":"Refreshed","context":"orders"}}
/// ```
pub fn init_json() {
    builder().json().debug().init();
}

/// Initialize pretty colorful logging
///
/// # Example output
/// ```text
///   2024-01-01T00:00:00.000Z  INFO application_context: Refreshed, context: orders
/// ```
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Initialize logging for application-context only (filters other crates)
pub fn init_context_only() {
    builder().context_only().debug().init();
}

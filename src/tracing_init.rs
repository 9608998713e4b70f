//! Log output for the logger, built on `tracing` and `tracing-subscriber`.
//!
//! The level comes from [`Settings::log_level`](crate::config::Settings), and
//! `RUST_LOG` overrides it when set. The format (pretty, compact or JSON) is
//! chosen on the command line. Logs go to stderr; stdout belongs to the live
//! console display.
//!
//! # Example
//! ```no_run
//! use rust_dmm::{config::Settings, tracing_init};
//! use rust_dmm::tracing_init::{OutputFormat, TracingConfig};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let config = TracingConfig::from_settings(&settings)?.with_format(OutputFormat::Json);
//! tracing_init::init(config)?;
//! info!(meter = "voltmeter", "Connected");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, colored.
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Level and layout of the log output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Most verbose level written when `RUST_LOG` is unset.
    pub level: Level,
    /// Line layout.
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Compact output at the level named in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.log_level)?,
            format: OutputFormat::Compact,
        })
    }

    /// Replace the line layout.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(())` when a subscriber is already installed.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let fmt_layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
        OutputFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Already initialized is expected in tests
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_filter_string() {
        assert_eq!(level_to_filter_string(Level::DEBUG), "debug");
        assert_eq!(level_to_filter_string(Level::ERROR), "error");
    }

    #[test]
    fn test_tracing_config_from_settings() {
        let settings = Settings {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        let config = TracingConfig::from_settings(&settings)
            .unwrap()
            .with_format(OutputFormat::Json);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_level_in_settings_is_rejected() {
        let settings = Settings {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        let error = TracingConfig::from_settings(&settings).unwrap_err();
        assert!(error.contains("loud"));
    }
}

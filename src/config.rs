//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the bench setup the logger was written for)
//! 2. A TOML file (`config/default.toml`, or the path given on the command line)
//! 3. Environment variables prefixed with `RUST_DMM_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use rust_dmm::config::Settings;
//!
//! # fn main() -> Result<(), rust_dmm::error::DaqError> {
//! let settings = Settings::load_from("config/default.toml")?;
//! settings.validate()?;
//! println!("Voltmeter at {}", settings.voltmeter.address);
//! # Ok(())
//! # }
//! ```
//!
//! `RUST_DMM_ACQUISITION__NPLC=10` overrides `acquisition.nplc`.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "RUST_DMM_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory receiving the daily CSV files
    pub output_dir: PathBuf,
    /// Sampling cadence and derived-quantity parameters
    pub acquisition: AcquisitionSettings,
    /// Meter measuring the voltage across the load
    pub voltmeter: MeterSettings,
    /// Meter measuring the current through the load
    pub ammeter: MeterSettings,
}

/// Sampling and processing parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionSettings {
    /// Integration time in power-line cycles
    pub nplc: f64,
    /// Mains frequency used to convert NPLC into seconds
    pub line_frequency_hz: f64,
    /// Interval between one-shot auto-zero calibrations
    #[serde(with = "humantime_serde")]
    pub auto_zero_period: Duration,
    /// Resistance between the voltmeter terminals and the load
    pub burden_resistance_ohms: f64,
    /// Hann filter length; derived from NPLC when absent
    #[serde(default)]
    pub filter_taps: Option<usize>,
    /// Failed exchanges in a row tolerated before the loop gives up
    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,
}

/// Connection and identity of one meter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeterSettings {
    /// IP address or hostname of the SCPI socket
    pub address: String,
    /// SCPI socket port
    #[serde(default = "default_scpi_port")]
    pub port: u16,
    /// Expected `SYSTEM:IDENTIFY?` reply
    pub identifier: String,
    /// Expected `SYSTEM:COMMUNICATE:LAN:HOSTNAME?` reply (without quotes)
    pub hostname: String,
    /// Text for `SYSTEM:LABEL`
    pub label: String,
    /// Fixed measurement range passed to `CONFIGURE`
    pub range: String,
    /// Upper bound for a single reply
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,
}

fn default_max_consecutive_faults() -> u32 {
    50
}

fn default_scpi_port() -> u16 {
    5025
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output_dir: PathBuf::from("samples"),
            acquisition: AcquisitionSettings::default(),
            voltmeter: MeterSettings {
                address: "11.0.0.100".to_string(),
                port: default_scpi_port(),
                identifier: "AT34461A".to_string(),
                hostname: "A-34461A-09358".to_string(),
                label: "Voltage".to_string(),
                range: "100".to_string(),
                response_timeout: default_response_timeout(),
            },
            ammeter: MeterSettings {
                address: "11.0.0.101".to_string(),
                port: default_scpi_port(),
                identifier: "AT34461A".to_string(),
                hostname: "K-34461A-18230".to_string(),
                label: "Current".to_string(),
                range: "10".to_string(),
                response_timeout: default_response_timeout(),
            },
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            nplc: 1.0,
            line_frequency_hz: 50.0,
            auto_zero_period: Duration::from_secs(10),
            burden_resistance_ohms: 0.025666,
            filter_taps: None,
            max_consecutive_faults: default_max_consecutive_faults(),
        }
    }
}

impl AcquisitionSettings {
    /// Duration of one integration window in seconds.
    pub fn nominal_period_secs(&self) -> f64 {
        self.nplc / self.line_frequency_hz
    }

    /// Number of Hann taps: explicit setting, else `25 / nplc` truncated.
    pub fn effective_filter_taps(&self) -> usize {
        self.filter_taps
            .unwrap_or_else(|| (25.0 / self.nplc).trunc() as usize)
            .max(2)
    }

    /// One second worth of cycles, used to prime the TCP connections.
    pub fn warmup_cycles(&self) -> usize {
        (self.line_frequency_hz / self.nplc).ceil() as usize
    }
}

impl Settings {
    /// Defaults merged with the environment only.
    pub fn load() -> AppResult<Self> {
        Ok(Self::figment().merge(Self::env()).extract()?)
    }

    /// Defaults, then the TOML file at `path`, then the environment.
    ///
    /// A missing file is not an error; figment simply skips it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Self::env())
            .extract()?)
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Self::figment().merge(Toml::string(toml)).extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "output_dir cannot be empty".to_string(),
            ));
        }

        let acq = &self.acquisition;
        if !(acq.nplc.is_finite() && acq.nplc > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid nplc {}. Must be a positive number",
                acq.nplc
            )));
        }
        if !(acq.line_frequency_hz.is_finite() && acq.line_frequency_hz > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid line_frequency_hz {}. Must be a positive number",
                acq.line_frequency_hz
            )));
        }
        if acq.auto_zero_period.is_zero() {
            return Err(DaqError::Configuration(
                "auto_zero_period must be greater than zero".to_string(),
            ));
        }
        if !acq.burden_resistance_ohms.is_finite() {
            return Err(DaqError::Configuration(
                "burden_resistance_ohms must be finite".to_string(),
            ));
        }
        if let Some(taps) = acq.filter_taps {
            if taps < 2 {
                return Err(DaqError::Configuration(format!(
                    "Invalid filter_taps {}. A Hann window needs at least 2 taps",
                    taps
                )));
            }
        }
        if acq.max_consecutive_faults == 0 {
            return Err(DaqError::Configuration(
                "max_consecutive_faults must be at least 1".to_string(),
            ));
        }

        for (name, meter) in [("voltmeter", &self.voltmeter), ("ammeter", &self.ammeter)] {
            meter
                .validate()
                .map_err(|msg| DaqError::Configuration(format!("{}: {}", name, msg)))?;
        }

        Ok(())
    }
}

impl MeterSettings {
    fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("address cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("port number must be greater than 0".to_string());
        }
        if self.range.trim().is_empty() {
            return Err("range cannot be empty".to_string());
        }
        if self.response_timeout.is_zero() {
            return Err("response_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

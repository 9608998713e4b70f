//! In-process stand-in for a Keysight 34461A.
//!
//! Understands the subset of SCPI the logger uses, keeps a transcript of every
//! command it receives and can be told to misbehave (garbage replies, silent
//! timeouts) so the fault handling of the acquisition loop can be exercised
//! without hardware.

use crate::config::MeterSettings;
use crate::error::{AppResult, DaqError};
use crate::instrument::{MeterFunction, ScpiTransport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Simulated digital multimeter.
pub struct SimulatedMeter {
    name: String,
    identifier: String,
    hostname: String,
    fetch_delay: Duration,
    state: Mutex<MeterState>,
}

#[derive(Debug)]
struct MeterState {
    function: MeterFunction,
    level: f64,
    ripple: f64,
    temperature: f64,
    label: String,
    display_text: Option<String>,
    nplc: f64,
    auto_zero_runs: u64,
    fetches: u64,
    reading: f64,
    initiated_at: Option<Instant>,
    garbage_replies: u32,
    failing_asks: u32,
    transcript: Vec<String>,
}

impl SimulatedMeter {
    /// Create a meter whose readings hover around `level`.
    pub fn new(
        name: &str,
        function: MeterFunction,
        identifier: &str,
        hostname: &str,
        level: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            identifier: identifier.to_string(),
            hostname: hostname.to_string(),
            fetch_delay: Duration::ZERO,
            state: Mutex::new(MeterState {
                function,
                level,
                ripple: 0.0,
                temperature: 31.5,
                label: String::new(),
                display_text: None,
                nplc: 10.0,
                auto_zero_runs: 0,
                fetches: 0,
                reading: 0.0,
                initiated_at: None,
                garbage_replies: 0,
                failing_asks: 0,
                transcript: Vec::new(),
            }),
        }
    }

    /// Create a meter that passes the identity checks for `settings`.
    pub fn from_settings(
        name: &str,
        function: MeterFunction,
        settings: &MeterSettings,
        level: f64,
    ) -> Self {
        Self::new(name, function, &settings.identifier, &settings.hostname, level)
    }

    /// Add a deterministic sinusoidal ripple of the given amplitude to the readings.
    pub fn with_ripple(mut self, amplitude: f64) -> Self {
        self.state.get_mut().ripple = amplitude;
        self
    }

    /// Hold `FETCH?` replies back until `delay` after the last `INITIATE`, like a
    /// meter integrating.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Answer the next `count` `FETCH?` queries with a non-numeric reply.
    pub async fn inject_garbage(&self, count: u32) {
        self.state.lock().await.garbage_replies += count;
    }

    /// Fail the next `count` queries as if the instrument never answered.
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.failing_asks += count;
    }

    /// Every command received so far, in order.
    pub async fn transcript(&self) -> Vec<String> {
        self.state.lock().await.transcript.clone()
    }

    /// Text currently shown on the front panel, if any.
    pub async fn display_text(&self) -> Option<String> {
        self.state.lock().await.display_text.clone()
    }

    /// Function selected by the last `CONFIGURE`.
    pub async fn function(&self) -> MeterFunction {
        self.state.lock().await.function
    }

    /// Label set with `SYSTEM:LABEL`.
    pub async fn label(&self) -> String {
        self.state.lock().await.label.clone()
    }

    /// Integration time set with `SENSE:<function>:DC:NPLC`.
    pub async fn nplc(&self) -> f64 {
        self.state.lock().await.nplc
    }

    /// How many measurements were triggered with `INITIATE`.
    pub async fn fetches(&self) -> u64 {
        self.state.lock().await.fetches
    }

    /// How many one-shot auto-zero runs were requested.
    pub async fn auto_zero_runs(&self) -> u64 {
        self.state.lock().await.auto_zero_runs
    }

    fn quoted(value: &str) -> Option<String> {
        let value = value.trim();
        value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .map(str::to_string)
    }

    fn apply(state: &mut MeterState, command: &str) {
        let (header, argument) = match command.split_once(' ') {
            Some((header, argument)) => (header.to_uppercase(), argument.trim()),
            None => (command.trim().to_uppercase(), ""),
        };

        match header.as_str() {
            "ABORT" => {}
            "INITIATE" => {
                state.fetches += 1;
                let phase = state.fetches as f64 * 0.3;
                state.reading = state.level + state.ripple * phase.sin();
                state.initiated_at = Some(Instant::now());
            }
            "DISPLAY:TEXT" => state.display_text = Self::quoted(argument),
            "DISPLAY:TEXT:CLEAR" => state.display_text = None,
            "SYSTEM:LABEL" => state.label = Self::quoted(argument).unwrap_or_default(),
            "CONFIGURE:VOLTAGE:DC" => state.function = MeterFunction::Voltage,
            "CONFIGURE:CURRENT:DC" => state.function = MeterFunction::Current,
            "SENSE:VOLTAGE:DC:NPLC" | "SENSE:CURRENT:DC:NPLC" => {
                if let Ok(nplc) = argument.parse() {
                    state.nplc = nplc;
                }
            }
            "SENSE:VOLTAGE:DC:ZERO:AUTO" | "SENSE:CURRENT:DC:ZERO:AUTO" => {
                if argument.eq_ignore_ascii_case("ONCE") {
                    state.auto_zero_runs += 1;
                    state.temperature += 0.01;
                }
            }
            "SENSE:VOLTAGE:DC:IMPEDANCE:AUTO"
            | "TRIGGER:COUNT"
            | "TRIGGER:DELAY:AUTO"
            | "TRIGGER:SOURCE"
            | "SAMPLE:COUNT" => {}
            _ => warn!("Simulated meter ignoring unknown command: {}", command),
        }
    }

    fn answer(&self, state: &mut MeterState, query: &str) -> AppResult<String> {
        match query.trim().to_uppercase().as_str() {
            "*IDN?" => {
                Ok("Keysight Technologies,34461A,SIM00000,A.02.14-02.40-02.14-00.49-01-01".to_string())
            }
            "SYSTEM:IDENTIFY?" => Ok(self.identifier.clone()),
            "UNIT:TEMP?" => Ok("C".to_string()),
            "SYSTEM:COMMUNICATE:LAN:HOSTNAME?" => Ok(format!("\"{}\"", self.hostname)),
            "CALIBRATION:DATE?; TIME?" => Ok("2016,3,14;10,15,0.000".to_string()),
            "CALIBRATION:TEMPERATURE?" => Ok("+2.34000000E+01".to_string()),
            "SYSTEM:TEMPERATURE?" => Ok(format!("{:+.8E}", state.temperature)),
            "FETCH?" => {
                if state.garbage_replies > 0 {
                    state.garbage_replies -= 1;
                    return Ok("-113,\"Undefined header\"".to_string());
                }
                Ok(format!("{:+.9E}", state.reading))
            }
            _ => Err(DaqError::Instrument(format!(
                "'{}' does not understand query '{}'",
                self.name, query
            ))),
        }
    }
}

#[async_trait]
impl ScpiTransport for SimulatedMeter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        debug!(device = %self.name, "<< {}", command);
        let mut state = self.state.lock().await;
        state.transcript.push(command.to_string());
        for part in command.split(';') {
            Self::apply(&mut state, part.trim());
        }
        Ok(())
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        debug!(device = %self.name, "<< {}", command);
        if !self.fetch_delay.is_zero() && command.trim().eq_ignore_ascii_case("FETCH?") {
            let initiated_at = self.state.lock().await.initiated_at;
            if let Some(initiated_at) = initiated_at {
                tokio::time::sleep_until(initiated_at + self.fetch_delay).await;
            }
        }
        let mut state = self.state.lock().await;
        state.transcript.push(command.to_string());

        if state.failing_asks > 0 {
            state.failing_asks -= 1;
            return Err(DaqError::Timeout {
                device: self.name.clone(),
                command: command.to_string(),
                timeout: Duration::ZERO,
            });
        }

        let reply = self.answer(&mut state, command)?;
        debug!(device = %self.name, ">> {}", reply);
        Ok(reply)
    }
}

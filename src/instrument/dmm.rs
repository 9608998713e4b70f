//! Keysight 34461A setup for continuous single-shot sampling.
//!
//! The meters are put into a fixed range with automatic zeroing disabled (the
//! acquisition loop requests a one-shot auto-zero periodically instead) and a
//! single immediate trigger per `INITIATE`. Identity checks only warn: a meter
//! answering with an unexpected hostname is still usable.

use crate::config::MeterSettings;
use crate::error::AppResult;
use crate::instrument::{MeterFunction, ScpiTransport};
use tracing::{info, warn};

/// Ask `command` and compare the reply with `expected`.
///
/// A mismatch is logged and reported as `Ok(false)`; only transport failures
/// are errors.
pub async fn verify<T: ScpiTransport + ?Sized>(
    session: &T,
    command: &str,
    expected: &str,
) -> AppResult<bool> {
    let actual = session.ask(command).await?;
    if actual == expected {
        Ok(true)
    } else {
        warn!(
            device = session.name(),
            "Failed to verify {} is {}, result is {}",
            command,
            expected,
            actual
        );
        Ok(false)
    }
}

/// Show `text` on the front panel.
pub async fn show_text<T: ScpiTransport + ?Sized>(session: &T, text: &str) -> AppResult<()> {
    session.send(&format!("DISPLAY:TEXT \"{}\"", text)).await
}

/// Remove any text from the front panel.
pub async fn clear_text<T: ScpiTransport + ?Sized>(session: &T) -> AppResult<()> {
    session.send("DISPLAY:TEXT:CLEAR").await
}

/// Parse a numeric reply such as `+1.234567890E+01`.
pub fn parse_reading(reply: &str) -> Option<f64> {
    reply.trim().parse::<f64>().ok()
}

/// Command requesting a single auto-zero before the next measurement.
pub fn auto_zero_once_command(function: MeterFunction) -> String {
    format!("SENSE:{}:DC:ZERO:AUTO ONCE", function.keyword())
}

/// Run the full configuration sequence on one meter.
///
/// Returns the number of identity checks that failed.
pub async fn configure<T: ScpiTransport + ?Sized>(
    session: &T,
    function: MeterFunction,
    settings: &MeterSettings,
    nplc: f64,
) -> AppResult<usize> {
    let keyword = function.keyword();

    session.send("ABORT").await?;
    let idn = session.ask("*IDN?").await?;
    info!(device = session.name(), "Identified as {}", idn);

    let mut mismatches = 0;
    let checks = [
        ("SYSTEM:IDENTIFY?", settings.identifier.clone()),
        ("UNIT:TEMP?", "C".to_string()),
        (
            "SYSTEM:COMMUNICATE:LAN:HOSTNAME?",
            format!("\"{}\"", settings.hostname),
        ),
    ];
    for (command, expected) in &checks {
        if !verify(session, command, expected).await? {
            mismatches += 1;
        }
    }

    let calibrated = session.ask("CALIBRATION:DATE?; TIME?").await?;
    let calibration_temperature = session.ask("CALIBRATION:TEMPERATURE?").await?;
    info!(
        device = session.name(),
        "Calibrated {} at {}°C", calibrated, calibration_temperature
    );

    session
        .send(&format!("SYSTEM:LABEL \"{}\"", settings.label))
        .await?;
    // Fixed range:
    session
        .send(&format!("CONFIGURE:{}:DC {}", keyword, settings.range))
        .await?;
    // Zeroing is requested manually every couple of samples.
    session
        .send(&format!("SENSE:{}:DC:ZERO:AUTO OFF", keyword))
        .await?;
    // Aperture:
    session
        .send(&format!("SENSE:{}:DC:NPLC {}", keyword, nplc))
        .await?;
    if function == MeterFunction::Voltage {
        // Impedance: 10 MΩ
        session.send("SENSE:VOLTAGE:DC:IMPEDANCE:AUTO OFF").await?;
    }
    // Trigger: 1, auto-delay, internal trigger
    session.send("TRIGGER:COUNT 1").await?;
    session.send("TRIGGER:DELAY:AUTO ON").await?;
    session.send("TRIGGER:SOURCE IMMEDIATE").await?;
    // Samples at a time:
    session.send("SAMPLE:COUNT 1").await?;

    Ok(mismatches)
}

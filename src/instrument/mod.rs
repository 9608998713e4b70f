//! Instrument sessions and the digital multimeter command set.
//!
//! Every meter is driven through a [`ScpiTransport`]: a line-oriented session that
//! can either send a command without reading anything back, or send a query and
//! block for exactly one reply line. Two implementations exist:
//!
//! - [`tcp::TcpScpiSession`] talks to a real instrument over its SCPI socket.
//! - [`simulated::SimulatedMeter`] answers in-process, for tests and dry runs.
//!
//! [`dmm`] holds the Keysight 34461A configuration sequence built on top of it.

use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::Arc;

pub mod dmm;
pub mod simulated;
pub mod tcp;

/// Trait for SCPI communication transports.
///
/// Abstracts the underlying communication mechanism so the acquisition loop can
/// run against real hardware or a simulation unchanged.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Device identifier used in logs.
    fn name(&self) -> &str;

    /// Send a command (or semicolon-separated commands) without reading a reply.
    async fn send(&self, command: &str) -> AppResult<()>;

    /// Send a query and return its single, trimmed reply line.
    async fn ask(&self, command: &str) -> AppResult<String>;
}

#[async_trait]
impl<T: ScpiTransport + ?Sized> ScpiTransport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        (**self).send(command).await
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        (**self).ask(command).await
    }
}

#[async_trait]
impl<T: ScpiTransport + ?Sized> ScpiTransport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        (**self).send(command).await
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        (**self).ask(command).await
    }
}

/// Measurement function a meter is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterFunction {
    /// DC voltage
    Voltage,
    /// DC current
    Current,
}

impl MeterFunction {
    /// SCPI subsystem keyword (`VOLTAGE` / `CURRENT`).
    pub fn keyword(self) -> &'static str {
        match self {
            MeterFunction::Voltage => "VOLTAGE",
            MeterFunction::Current => "CURRENT",
        }
    }
}

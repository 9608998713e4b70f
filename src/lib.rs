//! # rust_dmm
//!
//! Continuous DC power logger built around two LAN-connected Keysight 34461A
//! multimeters, one measuring voltage and one measuring current.
//!
//! The library holds the whole pipeline so the binary (`main.rs`) only wires it up:
//!
//! - **`acquisition`**: the producer. Configures both meters, then runs one
//!   FETCH/INITIATE cycle per integration window, with periodic auto-zero, burden
//!   correction, Hann smoothing and energy integration.
//! - **`consumer`**: drains the queue in batches, logs every sample and shows the
//!   newest one through a `SampleDisplay`.
//! - **`console`**: the ANSI terminal `SampleDisplay`.
//! - **`data`**: the `Sample` record, the `HannFilter`, the producer/consumer
//!   `SampleQueue` and the day-keyed CSV `DayLogStore`.
//! - **`instrument`**: the `ScpiTransport` abstraction, its TCP and simulated
//!   implementations and the 34461A setup sequence.
//! - **`config`**: layered `Settings` (defaults, TOML file, environment).
//! - **`error`**: the crate-wide `DaqError`.
//! - **`shutdown`**: the cooperative stop signal shared by both tasks.
//! - **`tracing_init`**: structured logging setup.

pub mod acquisition;
pub mod config;
pub mod console;
pub mod consumer;
pub mod data;
pub mod error;
pub mod instrument;
pub mod shutdown;
pub mod tracing_init;

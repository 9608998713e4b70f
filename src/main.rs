//! CLI entry point for rust_dmm.
//!
//! Connects to both meters (or simulates them), then runs the acquisition and
//! logging tasks until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! rust_dmm --config config/default.toml
//! rust_dmm --simulate --output-dir /tmp/samples --cycles 500
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use rust_dmm::acquisition::Acquisition;
use rust_dmm::config::{Settings, DEFAULT_CONFIG_PATH};
use rust_dmm::console::Console;
use rust_dmm::consumer::Consumer;
use rust_dmm::data::log_store::DayLogStore;
use rust_dmm::data::queue::SampleQueue;
use rust_dmm::instrument::simulated::SimulatedMeter;
use rust_dmm::instrument::tcp::TcpScpiSession;
use rust_dmm::instrument::{MeterFunction, ScpiTransport};
use rust_dmm::shutdown::ShutdownToken;
use rust_dmm::tracing_init::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rust_dmm")]
#[command(about = "Power and energy logger for a pair of SCPI multimeters", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use simulated meters instead of connecting to hardware
    #[arg(long)]
    simulate: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    /// Directory for the daily CSV files (overrides `output_dir`)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Stop after this many samples
    #[arg(long)]
    cycles: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut settings = Settings::load_from(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from '{}'",
            config_path.display()
        )
    })?;
    if let Some(output_dir) = cli.output_dir.clone() {
        settings.output_dir = output_dir;
    }
    settings.validate().context("Invalid configuration")?;

    let tracing_config = TracingConfig::from_settings(&settings)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    tracing_init::init(tracing_config).map_err(anyhow::Error::msg)?;

    println!("Connecting...");
    let (voltmeter, ammeter) = if cli.simulate {
        simulated_meters(&settings)
    } else {
        connect_meters(&settings).await?
    };
    println!("Press C-c to stop.\n");

    let store = DayLogStore::new(&settings.output_dir).with_context(|| {
        format!(
            "Failed to prepare output directory '{}'",
            settings.output_dir.display()
        )
    })?;
    let console = Console::stdout(
        settings.acquisition.nplc,
        settings.acquisition.burden_resistance_ohms,
    );

    let shutdown = ShutdownToken::new();
    let queue = SampleQueue::new();

    let mut acquisition = Acquisition::new(
        voltmeter,
        ammeter,
        &settings,
        queue.clone(),
        shutdown.clone(),
    );
    if let Some(cycles) = cli.cycles {
        acquisition = acquisition.with_cycle_limit(cycles);
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => signal_token.trigger(),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let producer = tokio::spawn(acquisition.run());
    let consumer_token = shutdown.clone();
    let consumer = tokio::spawn(async move {
        let result = Consumer::new(queue, store, console).run().await;
        if result.is_err() {
            // Nothing can be logged any more.
            consumer_token.trigger();
        }
        result
    });

    let (produced, consumed) = tokio::join!(producer, consumer);
    println!("\nQuitting.");

    let summary = produced
        .context("Acquisition task panicked")?
        .context("Acquisition failed")?;
    let written = consumed
        .context("Logging task panicked")?
        .context("Logging failed")?;

    info!(
        samples = summary.samples,
        written,
        timing_errors = summary.timing_errors,
        reading_faults = summary.reading_faults,
        max_dt = summary.max_dt,
        "Finished"
    );
    Ok(())
}

async fn connect_meters(
    settings: &Settings,
) -> Result<(Box<dyn ScpiTransport>, Box<dyn ScpiTransport>)> {
    let voltmeter = TcpScpiSession::connect(
        "voltmeter",
        &settings.voltmeter.address,
        settings.voltmeter.port,
        settings.voltmeter.response_timeout,
    )
    .await
    .context("Failed to open voltmeter")?;
    let ammeter = TcpScpiSession::connect(
        "ammeter",
        &settings.ammeter.address,
        settings.ammeter.port,
        settings.ammeter.response_timeout,
    )
    .await
    .context("Failed to open ammeter")?;

    Ok((Box::new(voltmeter), Box::new(ammeter)))
}

fn simulated_meters(settings: &Settings) -> (Box<dyn ScpiTransport>, Box<dyn ScpiTransport>) {
    info!("Using simulated meters");
    let period = Duration::from_secs_f64(settings.acquisition.nominal_period_secs());

    let voltmeter = SimulatedMeter::from_settings(
        "voltmeter",
        MeterFunction::Voltage,
        &settings.voltmeter,
        12.0,
    )
    .with_ripple(0.05)
    .with_fetch_delay(period);
    let ammeter = SimulatedMeter::from_settings(
        "ammeter",
        MeterFunction::Current,
        &settings.ammeter,
        0.5,
    )
    .with_ripple(0.01)
    .with_fetch_delay(period);

    (Box::new(voltmeter), Box::new(ammeter))
}

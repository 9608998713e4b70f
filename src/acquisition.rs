//! The acquisition loop: producer side of the pipeline.
//!
//! Drives both meters through **Setup** (configuration and a warm-up burst),
//! **Running** (one FETCH/INITIATE cycle per integration window, with a
//! periodic **AutoZero**) and **Shutdown** (front panels cleared, queue closed).
//!
//! Readings fetched at the top of a cycle belong to the `INITIATE` sent at the end
//! of the previous one, so the loop has to get back to the meters before the next
//! integration window elapses. Cycles that took longer than twice the nominal
//! period are counted as timing errors.
//!
//! All mutable bookkeeping lives in [`AcquisitionState`], which is pure and can be
//! driven with arbitrary timestamps.

use crate::config::{AcquisitionSettings, Settings};
use crate::data::filter::HannFilter;
use crate::data::queue::SampleQueue;
use crate::data::sample::Sample;
use crate::error::{AppResult, DaqError};
use crate::instrument::dmm::{self, auto_zero_once_command, parse_reading};
use crate::instrument::{MeterFunction, ScpiTransport};
use crate::shutdown::ShutdownToken;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of wall-clock timestamps in UNIX seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> f64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1e6
    }
}

/// Constants of a test run, derived once from the settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleParameters {
    /// Integration time in power-line cycles.
    pub nplc: f64,
    /// Duration of one integration window in seconds.
    pub nominal_period: f64,
    /// Seconds between one-shot auto-zeros.
    pub auto_zero_period: f64,
    /// Burden resistance in ohms.
    pub burden_resistance: f64,
    /// Hann filter length.
    pub filter_taps: usize,
    /// INITIATE/FETCH? rounds before the test starts.
    pub warmup_cycles: usize,
    /// Failed exchanges in a row tolerated.
    pub max_consecutive_faults: u32,
}

impl From<&AcquisitionSettings> for CycleParameters {
    fn from(settings: &AcquisitionSettings) -> Self {
        Self {
            nplc: settings.nplc,
            nominal_period: settings.nominal_period_secs(),
            auto_zero_period: settings.auto_zero_period.as_secs_f64(),
            burden_resistance: settings.burden_resistance_ohms,
            filter_taps: settings.effective_filter_taps(),
            warmup_cycles: settings.warmup_cycles(),
            max_consecutive_faults: settings.max_consecutive_faults,
        }
    }
}

/// Running state threaded through the steady-state cycles.
#[derive(Debug, Clone)]
pub struct AcquisitionState {
    params: CycleParameters,
    start_timestamp: f64,
    // INITIATE timestamp of the previous cycle (or of the last auto-zero):
    prev_initiate_timestamp: f64,
    auto_zero_timestamp: f64,
    dt: f64,
    max_dt: f64,
    timing_errors: u64,
    samples: u64,
    voltmeter_temperature: f64,
    ammeter_temperature: f64,
    energy: f64,
    energy_corrected: f64,
    energy_corrected_filtered: f64,
    voltage_corrected_filter: HannFilter,
    current_filter: HannFilter,
}

impl AcquisitionState {
    /// State at the start of the test.
    ///
    /// The auto-zero timestamp is placed more than one period in the past so the
    /// first cycle calibrates both meters. Filters are seeded with the last
    /// warm-up readings.
    pub fn new(
        params: CycleParameters,
        start_timestamp: f64,
        initial_voltage: f64,
        initial_current: f64,
    ) -> Self {
        let taps = params.filter_taps;
        Self {
            start_timestamp,
            prev_initiate_timestamp: start_timestamp,
            auto_zero_timestamp: start_timestamp - params.auto_zero_period - 1.0,
            dt: 0.0,
            max_dt: 0.0,
            timing_errors: 0,
            samples: 0,
            voltmeter_temperature: 0.0,
            ammeter_temperature: 0.0,
            energy: 0.0,
            energy_corrected: 0.0,
            energy_corrected_filtered: 0.0,
            voltage_corrected_filter: HannFilter::new(taps, initial_voltage),
            current_filter: HannFilter::new(taps, initial_current),
            params,
        }
    }

    /// Whether at least one auto-zero period has elapsed, measured at the previous
    /// cycle's INITIATE.
    pub fn auto_zero_due(&self) -> bool {
        self.prev_initiate_timestamp - self.auto_zero_timestamp >= self.params.auto_zero_period
    }

    /// Record an auto-zero finished at `now` together with the fresh temperatures.
    ///
    /// The auto-zero time is excluded from the next `dt`.
    pub fn mark_auto_zero(&mut self, now: f64, voltmeter_temperature: f64, ammeter_temperature: f64) {
        self.voltmeter_temperature = voltmeter_temperature;
        self.ammeter_temperature = ammeter_temperature;
        self.prev_initiate_timestamp = now;
        self.auto_zero_timestamp = now;
    }

    /// Count the previous cycle as a timing error if its `dt` exceeded twice the
    /// nominal period. Returns whether it did.
    pub fn check_timing(&mut self) -> bool {
        if self.dt > 2.0 * self.params.nominal_period {
            self.timing_errors += 1;
            true
        } else {
            false
        }
    }

    /// Integrate one cycle whose INITIATE went out at `initiate_timestamp` and
    /// build its sample.
    pub fn complete_cycle(
        &mut self,
        voltage: f64,
        current: f64,
        initiate_timestamp: f64,
        reading_faults: u64,
    ) -> Sample {
        self.samples += 1;

        let dt = initiate_timestamp - self.prev_initiate_timestamp;
        self.dt = dt;
        self.max_dt = self.max_dt.max(dt);

        // Calculations:
        let power = voltage * current;
        self.energy += power * dt;
        // Corrections:
        let voltage_error = current * self.params.burden_resistance;
        let voltage_corrected = voltage - voltage_error;
        let power_corrected = voltage_corrected * current;
        self.energy_corrected += power_corrected * dt;
        // Filtering:
        let voltage_corrected_filtered = self.voltage_corrected_filter.process(voltage_corrected);
        let current_filtered = self.current_filter.process(current);
        let power_corrected_filtered = voltage_corrected_filtered * current_filtered;
        self.energy_corrected_filtered += power_corrected_filtered * dt;

        self.prev_initiate_timestamp = initiate_timestamp;

        Sample {
            number: self.samples,
            timing_errors: self.timing_errors,
            reading_faults,
            start_timestamp: self.start_timestamp,
            initiate_timestamp,
            auto_zero_timestamp: self.auto_zero_timestamp,
            dt,
            max_dt: self.max_dt,
            filter_taps: self.params.filter_taps,
            voltage,
            voltmeter_temperature: self.voltmeter_temperature,
            current,
            ammeter_temperature: self.ammeter_temperature,
            power,
            energy: self.energy,
            voltage_error,
            voltage_corrected,
            power_corrected,
            energy_corrected: self.energy_corrected,
            voltage_corrected_filtered,
            current_filtered,
            power_corrected_filtered,
            energy_corrected_filtered: self.energy_corrected_filtered,
        }
    }

    /// Samples produced so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Timing errors counted so far.
    pub fn timing_errors(&self) -> u64 {
        self.timing_errors
    }

    /// Largest `dt` so far.
    pub fn max_dt(&self) -> f64 {
        self.max_dt
    }

    /// Time of the last auto-zero.
    pub fn auto_zero_timestamp(&self) -> f64 {
        self.auto_zero_timestamp
    }

    /// Reference the next `dt` is measured from.
    pub fn prev_initiate_timestamp(&self) -> f64 {
        self.prev_initiate_timestamp
    }
}

/// Bookkeeping of failed or unparsable exchanges.
///
/// A missing or non-numeric reading becomes `0.0`; only a long run of failed
/// exchanges, or a failure that is not a transport fault, aborts the acquisition.
#[derive(Debug)]
struct FaultTracker {
    reading_faults: u64,
    consecutive: u32,
    limit: u32,
}

impl FaultTracker {
    fn new(limit: u32) -> Self {
        Self {
            reading_faults: 0,
            consecutive: 0,
            limit,
        }
    }

    async fn read_number(&mut self, session: &dyn ScpiTransport, command: &str) -> AppResult<f64> {
        match session.ask(command).await {
            Ok(reply) => {
                self.consecutive = 0;
                match parse_reading(&reply) {
                    Some(value) => Ok(value),
                    None => {
                        self.reading_faults += 1;
                        warn!(
                            device = session.name(),
                            "Non-numeric reply '{}' to {}, substituting 0", reply, command
                        );
                        Ok(0.0)
                    }
                }
            }
            Err(e) => {
                self.reading_faults += 1;
                self.exchange_failed(session, command, e)?;
                Ok(0.0)
            }
        }
    }

    async fn send(&mut self, session: &dyn ScpiTransport, command: &str) -> AppResult<()> {
        match session.send(command).await {
            Ok(()) => Ok(()),
            Err(e) => self.exchange_failed(session, command, e),
        }
    }

    fn exchange_failed(
        &mut self,
        session: &dyn ScpiTransport,
        command: &str,
        error: DaqError,
    ) -> AppResult<()> {
        if !error.is_transport_fault() {
            return Err(error);
        }
        self.consecutive += 1;
        warn!(
            device = session.name(),
            consecutive = self.consecutive,
            "{} failed: {}",
            command,
            error
        );
        if self.consecutive >= self.limit {
            return Err(DaqError::Instrument(format!(
                "'{}' failed {} consecutive exchanges, last error: {}",
                session.name(),
                self.consecutive,
                error
            )));
        }
        Ok(())
    }
}

/// Totals reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionSummary {
    /// Samples enqueued.
    pub samples: u64,
    /// Timing errors counted.
    pub timing_errors: u64,
    /// Readings substituted by zero (warm-up included).
    pub reading_faults: u64,
    /// Largest cycle duration.
    pub max_dt: f64,
}

/// Producer owning both meter sessions.
pub struct Acquisition {
    voltmeter: Box<dyn ScpiTransport>,
    ammeter: Box<dyn ScpiTransport>,
    settings: Settings,
    params: CycleParameters,
    clock: Arc<dyn Clock>,
    queue: SampleQueue,
    shutdown: ShutdownToken,
    cycle_limit: Option<u64>,
    faults: FaultTracker,
}

impl Acquisition {
    /// Create the loop; nothing is sent to the meters until [`run`](Self::run).
    pub fn new(
        voltmeter: Box<dyn ScpiTransport>,
        ammeter: Box<dyn ScpiTransport>,
        settings: &Settings,
        queue: SampleQueue,
        shutdown: ShutdownToken,
    ) -> Self {
        let params = CycleParameters::from(&settings.acquisition);
        Self {
            voltmeter,
            ammeter,
            settings: settings.clone(),
            faults: FaultTracker::new(params.max_consecutive_faults),
            params,
            clock: Arc::new(SystemClock),
            queue,
            shutdown,
            cycle_limit: None,
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop on its own after `cycles` samples.
    pub fn with_cycle_limit(mut self, cycles: u64) -> Self {
        self.cycle_limit = Some(cycles);
        self
    }

    /// Run until shutdown is requested, the cycle limit is reached or the meters
    /// stop answering.
    ///
    /// Whatever the outcome, the front panels are cleared and the queue is closed so
    /// the consumer can drain it and finish.
    pub async fn run(mut self) -> AppResult<AcquisitionSummary> {
        let result = self.acquire().await;

        info!("Clearing front panels");
        for session in [&self.voltmeter, &self.ammeter] {
            if let Err(e) = dmm::clear_text(session.as_ref()).await {
                warn!(device = session.name(), "Failed to clear display: {}", e);
            }
        }
        self.queue.close();

        result
    }

    async fn acquire(&mut self) -> AppResult<AcquisitionSummary> {
        let (initial_voltage, initial_current) = self.setup().await?;

        let start_timestamp = self.clock.now();
        let mut state = AcquisitionState::new(
            self.params.clone(),
            start_timestamp,
            initial_voltage,
            initial_current,
        );
        info!(
            nplc = self.params.nplc,
            taps = self.params.filter_taps,
            "Acquisition running"
        );

        while !self.shutdown.is_triggered() {
            if self.cycle_limit.is_some_and(|limit| state.samples() >= limit) {
                break;
            }
            let sample = self.cycle(&mut state).await?;
            self.queue.push(sample).await;
        }

        let summary = AcquisitionSummary {
            samples: state.samples(),
            timing_errors: state.timing_errors(),
            reading_faults: self.faults.reading_faults,
            max_dt: state.max_dt(),
        };
        info!(
            samples = summary.samples,
            timing_errors = summary.timing_errors,
            reading_faults = summary.reading_faults,
            "Acquisition stopped"
        );
        Ok(summary)
    }

    /// Configure both meters and prime the connections.
    ///
    /// Returns the last warm-up readings, used to seed the filters.
    async fn setup(&mut self) -> AppResult<(f64, f64)> {
        info!("Configuring for test...");
        for session in [&self.voltmeter, &self.ammeter] {
            dmm::show_text(session.as_ref(), "Configuring for test...").await?;
        }

        let nplc = self.params.nplc;
        let mismatches = dmm::configure(
            self.voltmeter.as_ref(),
            MeterFunction::Voltage,
            &self.settings.voltmeter,
            nplc,
        )
        .await?
            + dmm::configure(
                self.ammeter.as_ref(),
                MeterFunction::Current,
                &self.settings.ammeter,
                nplc,
            )
            .await?;
        if mismatches > 0 {
            warn!(mismatches, "Meter identity checks failed, continuing anyway");
        }

        info!(cycles = self.params.warmup_cycles, "TCP warmup...");
        for session in [&self.voltmeter, &self.ammeter] {
            dmm::show_text(session.as_ref(), "     TCP warmup...     ").await?;
        }

        let mut initial_voltage = 0.0;
        let mut initial_current = 0.0;
        for _ in 0..self.params.warmup_cycles {
            self.faults.send(self.voltmeter.as_ref(), "INITIATE").await?;
            self.faults.send(self.ammeter.as_ref(), "INITIATE").await?;

            initial_voltage = self.faults.read_number(self.voltmeter.as_ref(), "FETCH?").await?;
            initial_current = self.faults.read_number(self.ammeter.as_ref(), "FETCH?").await?;
        }

        for session in [&self.voltmeter, &self.ammeter] {
            dmm::show_text(session.as_ref(), "Test in progress (voltage)...").await?;
        }
        // Reset:
        self.voltmeter.send("ABORT").await?;
        self.ammeter.send("ABORT").await?;
        // Start measuring:
        self.voltmeter.send("INITIATE").await?;
        self.ammeter.send("INITIATE").await?;

        Ok((initial_voltage, initial_current))
    }

    /// One steady-state cycle.
    async fn cycle(&mut self, state: &mut AcquisitionState) -> AppResult<Sample> {
        let voltage = self.faults.read_number(self.voltmeter.as_ref(), "FETCH?").await?;
        let current = self.faults.read_number(self.ammeter.as_ref(), "FETCH?").await?;

        // Auto-zero and temperature read:
        if state.auto_zero_due() {
            self.faults
                .send(
                    self.voltmeter.as_ref(),
                    &auto_zero_once_command(MeterFunction::Voltage),
                )
                .await?;
            self.faults
                .send(
                    self.ammeter.as_ref(),
                    &auto_zero_once_command(MeterFunction::Current),
                )
                .await?;

            let voltmeter_temperature = self
                .faults
                .read_number(self.voltmeter.as_ref(), "SYSTEM:TEMPERATURE?")
                .await?;
            let ammeter_temperature = self
                .faults
                .read_number(self.ammeter.as_ref(), "SYSTEM:TEMPERATURE?")
                .await?;

            state.mark_auto_zero(self.clock.now(), voltmeter_temperature, ammeter_temperature);
            debug!(
                voltmeter_temperature,
                ammeter_temperature, "Auto-zero done"
            );
        } else if state.check_timing() {
            debug!(timing_errors = state.timing_errors(), "Cycle overran");
        }

        // Initiate single measurement:
        self.faults.send(self.voltmeter.as_ref(), "INITIATE").await?;
        self.faults.send(self.ammeter.as_ref(), "INITIATE").await?;

        // Timestamp @ INITIATE command:
        let initiate_timestamp = self.clock.now();
        Ok(state.complete_cycle(
            voltage,
            current,
            initiate_timestamp,
            self.faults.reading_faults,
        ))
    }
}

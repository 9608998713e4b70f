//! End-to-end tests of the acquisition pipeline against simulated meters.
//!
//! Both tasks run as in the binary: the acquisition loop produces into the
//! queue, the consumer drains it into a temporary log directory.

use rust_dmm::acquisition::{Acquisition, AcquisitionSummary, Clock};
use rust_dmm::config::Settings;
use rust_dmm::consumer::{Consumer, SampleDisplay};
use rust_dmm::data::log_store::DayLogStore;
use rust_dmm::data::queue::SampleQueue;
use rust_dmm::data::sample::Sample;
use rust_dmm::instrument::simulated::SimulatedMeter;
use rust_dmm::instrument::MeterFunction;
use rust_dmm::shutdown::ShutdownToken;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

#[derive(Clone, Default)]
struct RecordingDisplay {
    shown: Arc<Mutex<Vec<u64>>>,
}

impl SampleDisplay for RecordingDisplay {
    fn show(&mut self, sample: &Sample, _queue_depth: usize) -> std::io::Result<()> {
        self.shown.lock().unwrap().push(sample.number);
        Ok(())
    }
}

/// Clock advancing by a fixed step on every reading.
struct SteppingClock {
    bits: AtomicU64,
    step: f64,
}

impl Clock for SteppingClock {
    fn now(&self) -> f64 {
        let step = self.step;
        let previous = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + step).to_bits())
            })
            .unwrap();
        f64::from_bits(previous)
    }
}

fn simulated_meters(settings: &Settings, delay: Duration) -> (Arc<SimulatedMeter>, Arc<SimulatedMeter>) {
    let voltmeter = SimulatedMeter::from_settings(
        "voltmeter",
        MeterFunction::Voltage,
        &settings.voltmeter,
        12.0,
    )
    .with_ripple(0.1)
    .with_fetch_delay(delay);
    let ammeter = SimulatedMeter::from_settings(
        "ammeter",
        MeterFunction::Current,
        &settings.ammeter,
        0.5,
    )
    .with_fetch_delay(delay);
    (Arc::new(voltmeter), Arc::new(ammeter))
}

fn test_settings(output_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.output_dir = output_dir.to_path_buf();
    settings.acquisition.line_frequency_hz = 10.0;
    settings
}

async fn run_pipeline(
    acquisition: Acquisition,
    queue: SampleQueue,
    store: DayLogStore,
    display: RecordingDisplay,
) -> (AcquisitionSummary, u64) {
    let producer = tokio::spawn(acquisition.run());
    let consumer = tokio::spawn(Consumer::new(queue, store, display).run());

    let summary = producer
        .await
        .expect("acquisition task panicked")
        .expect("acquisition failed");
    let written = consumer
        .await
        .expect("consumer task panicked")
        .expect("consumer failed");
    (summary, written)
}

fn csv_files(dir: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = std::fs::read_dir(dir)
        .expect("output directory exists")
        .map(|entry| {
            let path = entry.expect("readable entry").path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let content = std::fs::read_to_string(&path).expect("readable file");
            (name, content)
        })
        .collect();
    files.sort();
    files
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_sample_is_logged_in_order() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (voltmeter, ammeter) = simulated_meters(&settings, Duration::ZERO);
    let queue = SampleQueue::new();
    let display = RecordingDisplay::default();

    let acquisition = Acquisition::new(
        Box::new(voltmeter.clone()),
        Box::new(ammeter.clone()),
        &settings,
        queue.clone(),
        ShutdownToken::new(),
    )
    .with_cycle_limit(50);
    let store = DayLogStore::new(&settings.output_dir).unwrap();

    let (summary, written) = run_pipeline(acquisition, queue, store, display.clone()).await;

    assert_eq!(summary.samples, 50);
    assert_eq!(written, 50);

    let files = csv_files(dir.path());
    assert_eq!(files.len(), 1, "all samples fall on the same day");
    let lines: Vec<&str> = files[0].1.lines().collect();
    assert!(lines[0].starts_with("#timestamp,#voltage,"));
    assert_eq!(lines.len(), 51);
    assert_eq!(lines.iter().filter(|l| l.starts_with('#')).count(), 1);

    let timestamps: Vec<f64> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    // The newest sample was the last one shown.
    assert_eq!(display.shown.lock().unwrap().last(), Some(&50));

    assert_eq!(voltmeter.display_text().await, None);
    assert_eq!(ammeter.display_text().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_queue_without_loss() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (voltmeter, ammeter) = simulated_meters(&settings, Duration::from_millis(2));
    let queue = SampleQueue::new();
    let shutdown = ShutdownToken::new();

    let acquisition = Acquisition::new(
        Box::new(voltmeter.clone()),
        Box::new(ammeter),
        &settings,
        queue.clone(),
        shutdown.clone(),
    );
    let store = DayLogStore::new(&settings.output_dir).unwrap();

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.trigger();
    });
    let (summary, written) =
        run_pipeline(acquisition, queue, store, RecordingDisplay::default()).await;
    trigger.await.unwrap();

    assert!(summary.samples > 0);
    assert_eq!(written, summary.samples);

    let files = csv_files(dir.path());
    let rows: usize = files.iter().map(|(_, c)| c.lines().count() - 1).sum();
    assert_eq!(rows as u64, summary.samples);

    let transcript = voltmeter.transcript().await;
    assert_eq!(transcript.last().map(String::as_str), Some("DISPLAY:TEXT:CLEAR"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_samples_rotate_at_utc_midnight() {
    let dir = tempdir().unwrap();
    let settings = test_settings(dir.path());
    let (voltmeter, ammeter) = simulated_meters(&settings, Duration::ZERO);
    let queue = SampleQueue::new();

    // Start half a second before 2016-05-02T00:00:00Z, 70 ms per clock reading.
    let clock = SteppingClock {
        bits: AtomicU64::new(1_462_147_199.5_f64.to_bits()),
        step: 0.07,
    };
    let acquisition = Acquisition::new(
        Box::new(voltmeter),
        Box::new(ammeter),
        &settings,
        queue.clone(),
        ShutdownToken::new(),
    )
    .with_clock(Arc::new(clock))
    .with_cycle_limit(10);
    let store = DayLogStore::new(&settings.output_dir).unwrap();

    let (_, written) = run_pipeline(acquisition, queue, store, RecordingDisplay::default()).await;
    assert_eq!(written, 10);

    let files = csv_files(dir.path());
    let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["samples.2016-05-01.csv", "samples.2016-05-02.csv"]
    );
    for (_, content) in &files {
        assert_eq!(content.lines().filter(|l| l.starts_with('#')).count(), 1);
    }
    assert_eq!(files[0].1.lines().count(), 1 + 6);
    assert_eq!(files[1].1.lines().count(), 1 + 4);
}

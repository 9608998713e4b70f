//! Consumer side of the pipeline: logs every sample and shows the newest one.

use crate::data::log_store::DayLogStore;
use crate::data::queue::SampleQueue;
use crate::data::sample::Sample;
use crate::error::AppResult;
use std::io;
use tracing::{debug, info, warn};

/// Something that can present the latest sample to the operator.
pub trait SampleDisplay: Send {
    /// Show `sample`; `queue_depth` is the number of samples still waiting.
    fn show(&mut self, sample: &Sample, queue_depth: usize) -> io::Result<()>;
}

/// Drains the queue batch by batch until it is closed and empty.
pub struct Consumer<D: SampleDisplay> {
    queue: SampleQueue,
    store: DayLogStore,
    display: D,
    written: u64,
}

impl<D: SampleDisplay> Consumer<D> {
    /// Consumer draining `queue` into `store`.
    pub fn new(queue: SampleQueue, store: DayLogStore, display: D) -> Self {
        Self {
            queue,
            store,
            display,
            written: 0,
        }
    }

    /// Run to completion and return the number of samples logged.
    ///
    /// A storage failure ends the loop with an error; a display failure is only
    /// logged.
    pub async fn run(mut self) -> AppResult<u64> {
        debug!("Consumer started");
        while let Some(batch) = self.queue.next_batch().await {
            self.process_batch(&batch)?;
        }
        self.store.flush()?;
        info!(samples = self.written, "Sample log closed");
        Ok(self.written)
    }

    /// Log every sample of `batch`, flush, then display the last one.
    pub fn process_batch(&mut self, batch: &[Sample]) -> AppResult<()> {
        for sample in batch {
            self.store.write(sample)?;
        }
        self.store.flush()?;
        self.written += batch.len() as u64;

        // Only display the latest sample:
        if let Some(sample) = batch.last() {
            debug!(number = sample.number, batch = batch.len(), "Batch logged");
            if let Err(e) = self.display.show(sample, self.queue.depth()) {
                warn!("Failed to update display: {}", e);
            }
        }
        Ok(())
    }

    /// Samples logged so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

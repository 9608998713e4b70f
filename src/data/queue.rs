//! Hand-off between the acquisition loop and the consumer.
//!
//! An unbounded, mutex-guarded deque paired with a counting semaphore. The
//! producer pushes one sample and releases one permit; the consumer waits for a
//! permit and then drains *everything* queued so far, so it always sees samples in
//! arrival order but in batches of variable size.
//!
//! Depth is never capped: when the consumer stalls, memory grows instead of
//! acquisition blocking or dropping data.

use crate::data::sample::Sample;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Cloneable handle to the shared sample queue.
#[derive(Debug, Clone)]
pub struct SampleQueue {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    samples: Mutex<VecDeque<Sample>>,
    available: Semaphore,
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                samples: Mutex::new(VecDeque::new()),
                available: Semaphore::new(0),
            }),
        }
    }

    /// Enqueue one sample and wake the consumer.
    pub async fn push(&self, sample: Sample) {
        {
            let mut samples = self.inner.samples.lock().await;
            samples.push_back(sample);
        }
        self.inner.available.add_permits(1);
    }

    /// Wait for at least one signal, then drain the whole backing queue.
    ///
    /// The batch may be empty when an earlier drain already took the samples the
    /// pending signals refer to. Returns `None` once the queue has been closed and
    /// nothing is left to drain.
    pub async fn next_batch(&self) -> Option<Vec<Sample>> {
        match self.inner.available.acquire().await {
            Ok(permit) => {
                permit.forget();
                Some(self.drain().await)
            }
            Err(_) => {
                let rest = self.drain().await;
                if rest.is_empty() {
                    None
                } else {
                    Some(rest)
                }
            }
        }
    }

    async fn drain(&self) -> Vec<Sample> {
        let mut samples = self.inner.samples.lock().await;
        samples.drain(..).collect()
    }

    /// Stop accepting waits; the consumer drains what is left and finishes.
    pub fn close(&self) {
        self.inner.available.close();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.available.is_closed()
    }

    /// Pending wake-up signals, shown on the console as the queue depth.
    pub fn depth(&self) -> usize {
        self.inner.available.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn numbered(number: u64) -> Sample {
        Sample {
            number,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn drains_everything_on_wake() {
        let queue = SampleQueue::new();
        for n in 1..=3 {
            queue.push(numbered(n)).await;
        }
        assert_eq!(queue.depth(), 3);

        let batch = queue.next_batch().await.unwrap();
        assert_eq!(batch.iter().map(|s| s.number).collect::<Vec<_>>(), vec![1, 2, 3]);

        // The remaining signals yield empty batches.
        assert_eq!(queue.depth(), 2);
        assert!(queue.next_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preserves_fifo_order_across_batches() {
        let queue = SampleQueue::new();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for n in 1..=100 {
                    queue.push(numbered(n)).await;
                    if n % 7 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                queue.close();
            })
        };

        let mut seen = Vec::new();
        let mut batches = 0;
        while let Some(batch) = queue.next_batch().await {
            batches += 1;
            seen.extend(batch.into_iter().map(|s| s.number));
        }
        producer.await.unwrap();

        assert_eq!(seen, (1..=100).collect::<Vec<_>>());
        assert!(batches >= 1);
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let queue = SampleQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next_batch().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn samples_pushed_before_close_are_not_lost() {
        let queue = SampleQueue::new();
        queue.push(numbered(1)).await;
        queue.push(numbered(2)).await;
        queue.close();

        let batch = queue.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(queue.next_batch().await.is_none());
    }
}

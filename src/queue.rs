//! Single-producer, single-consumer record queue between the acquisition loop
//! and the persistence writer.
//!
//! Records are pre-encoded CSV lines carried over a
//! `tokio::sync::mpsc::unbounded_channel`. The producer never blocks: past the
//! soft capacity it keeps queueing and logs a backpressure warning instead of
//! dropping samples. The consumer waits in [`QueueConsumer::pop`] for at most
//! the given timeout.
//!
//! End of stream is the producer handle going away, finished or dropped. The
//! consumer sees [`Popped::EndOfStream`] only after every record sent before
//! that point has been drained.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AppResult, DaqError};

/// Result of a [`QueueConsumer::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    /// Next record in push order.
    Record(Vec<u8>),
    /// Nothing arrived within the timeout.
    Empty,
    /// The producer has finished and the queue is drained.
    EndOfStream,
}

/// Depth accounting shared by both ends of the channel.
#[derive(Debug)]
pub struct SampleQueue {
    soft_capacity: usize,
    queued: AtomicUsize,
    pushed: AtomicU64,
    over_capacity: AtomicBool,
    backpressure_events: AtomicU64,
}

impl SampleQueue {
    /// Create a queue and split it into its two handles.
    pub fn channel(soft_capacity: usize) -> (QueueProducer, QueueConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SampleQueue {
            soft_capacity: soft_capacity.max(1),
            queued: AtomicUsize::new(0),
            pushed: AtomicU64::new(0),
            over_capacity: AtomicBool::new(false),
            backpressure_events: AtomicU64::new(0),
        });
        (
            QueueProducer {
                tx,
                shared: Arc::clone(&shared),
            },
            QueueConsumer { rx, shared },
        )
    }

    fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Enqueue side. Exactly one exists per queue.
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<SampleQueue>,
}

impl QueueProducer {
    /// Append a record. Never blocks.
    ///
    /// Fails with [`DaqError::QueueClosed`] once the consumer is gone.
    pub fn push(&self, record: Vec<u8>) -> AppResult<()> {
        let queued = self.shared.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(record).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(DaqError::QueueClosed);
        }
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);

        let over = queued > self.shared.soft_capacity;
        let was_over = self.shared.over_capacity.swap(over, Ordering::SeqCst);
        if over && !was_over {
            self.shared.backpressure_events.fetch_add(1, Ordering::Relaxed);
            warn!(
                queued,
                soft_capacity = self.shared.soft_capacity,
                "Writer falling behind, sample queue over capacity"
            );
        }
        Ok(())
    }

    /// Number of times the queue crossed its soft capacity.
    pub fn backpressure_events(&self) -> u64 {
        self.shared.backpressure_events.load(Ordering::Relaxed)
    }

    /// Signal end of stream after the last record.
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for QueueProducer {
    fn drop(&mut self) {
        debug!(
            records = self.shared.pushed.load(Ordering::Relaxed),
            unread = self.shared.len(),
            backpressure_events = self.backpressure_events(),
            "Sample queue end of stream"
        );
    }
}

/// Dequeue side. Exactly one exists per queue.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<SampleQueue>,
}

impl QueueConsumer {
    /// Take the next record, waiting up to `timeout` for one to arrive.
    ///
    /// Needs a tokio runtime with the time driver enabled.
    pub async fn pop(&mut self, timeout: Duration) -> Popped {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(record)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                Popped::Record(record)
            }
            Ok(None) => Popped::EndOfStream,
            Err(_) => Popped::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_drains_in_push_order_then_end() {
        let (tx, mut rx) = SampleQueue::channel(16);
        tx.push(b"A".to_vec()).unwrap();
        tx.push(b"B".to_vec()).unwrap();
        tx.push(b"C".to_vec()).unwrap();
        tx.finish();

        assert_eq!(rx.pop(SHORT).await, Popped::Record(b"A".to_vec()));
        assert_eq!(rx.pop(SHORT).await, Popped::Record(b"B".to_vec()));
        assert_eq!(rx.pop(SHORT).await, Popped::Record(b"C".to_vec()));
        assert_eq!(rx.pop(SHORT).await, Popped::EndOfStream);
        assert_eq!(rx.pop(SHORT).await, Popped::EndOfStream);
    }

    #[tokio::test]
    async fn test_pop_times_out_empty() {
        let (_tx, mut rx) = SampleQueue::channel(16);
        let start = Instant::now();
        assert_eq!(rx.pop(Duration::from_millis(20)).await, Popped::Empty);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_dropped_producer_ends_stream() {
        let (tx, mut rx) = SampleQueue::channel(16);
        tx.push(b"last".to_vec()).unwrap();
        drop(tx);
        assert_eq!(rx.pop(SHORT).await, Popped::Record(b"last".to_vec()));
        assert_eq!(rx.pop(SHORT).await, Popped::EndOfStream);
    }

    #[test]
    fn test_push_fails_after_consumer_dropped() {
        let (tx, rx) = SampleQueue::channel(16);
        drop(rx);
        assert!(matches!(tx.push(b"x".to_vec()), Err(DaqError::QueueClosed)));
        assert_eq!(tx.shared.len(), 0);
    }

    #[tokio::test]
    async fn test_over_capacity_keeps_records() {
        let (tx, mut rx) = SampleQueue::channel(2);
        for i in 0..5u8 {
            tx.push(vec![i]).unwrap();
        }
        assert_eq!(tx.backpressure_events(), 1);
        assert_eq!(rx.shared.len(), 5);
        for i in 0..5u8 {
            assert_eq!(rx.pop(SHORT).await, Popped::Record(vec![i]));
        }
        assert_eq!(rx.shared.len(), 0);

        // Draining below capacity re-arms the warning.
        for i in 0..3u8 {
            tx.push(vec![i]).unwrap();
        }
        assert_eq!(tx.backpressure_events(), 2);
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push_from_thread() {
        let (tx, mut rx) = SampleQueue::channel(16);
        let producer = thread::spawn(move || {
            for i in 0..100u8 {
                tx.push(vec![i]).unwrap();
            }
            tx.finish();
        });

        let mut seen = Vec::new();
        loop {
            match rx.pop(Duration::from_secs(5)).await {
                Popped::Record(r) => seen.push(r),
                Popped::Empty => continue,
                Popped::EndOfStream => break,
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100u8).map(|i| vec![i]).collect::<Vec<_>>());
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::firehose::Envelope;

/// How long a blocking `pop` sleeps between polls of an empty buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lossy fixed-capacity buffer between the Ingestor and the Processor.
///
/// `push` never blocks: when the buffer is full the oldest unread record is
/// evicted. The upstream firehose cannot be flow-controlled, and back-pressure
/// gets the subscriber disconnected, so bounded loss is the trade. Within
/// retained records FIFO order is preserved.
///
/// Cloning is cheap — clones share the same backing storage.
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<Envelope>,
    capacity: usize,
    dropped: u64,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
            })),
        }
    }

    /// Append a record, evicting the oldest if the buffer is full.
    pub fn push(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() == inner.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
        }
        inner.items.push_back(envelope);
    }

    /// Non-blocking read. Reports any records lost since the last report.
    pub fn try_pop(&self) -> Option<Envelope> {
        let (item, missed) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.items.pop_front(), std::mem::take(&mut inner.dropped))
        };

        if missed > 0 {
            info!(dropped = missed, "buffer overflowed, records lost");
        }

        item
    }

    /// Read the next record, polling until one arrives. Throughput dominates
    /// latency on this path, so a short poll beats a condition variable.
    pub async fn pop(&self) -> Envelope {
        loop {
            if let Some(envelope) = self.try_pop() {
                return envelope;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

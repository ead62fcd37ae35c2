pub mod buffer;

pub use buffer::Buffer;

use tokio::sync::mpsc;
use tracing::info;

use crate::firehose::{Envelope, EventKind};
use crate::store::Counter;

/// Source type the platform router stamps on its own log records.
const ROUTER_SOURCE_TYPE: &str = "RTR";

/// Copies records from the transport channel into the buffer.
///
/// Does nothing else. Any work on this path back-pressures the firehose, and
/// the platform answers back-pressure by disconnecting the subscriber.
pub struct Ingestor {
    msgs: mpsc::Receiver<Envelope>,
    buffer: Buffer,
}

impl Ingestor {
    pub fn new(msgs: mpsc::Receiver<Envelope>, buffer: Buffer) -> Self {
        Self { msgs, buffer }
    }

    /// Run until the transport channel closes.
    pub async fn run(mut self) {
        while let Some(envelope) = self.msgs.recv().await {
            self.buffer.push(envelope);
        }
        info!("transport channel closed, ingestor stopping");
    }
}

/// Drains the buffer, filters records, and feeds the counter.
///
/// Classification lives here rather than in the Ingestor so that policy
/// changes never touch ingest latency.
pub struct Processor {
    buffer: Buffer,
    counter: Counter,
    include_router_logs: bool,
}

impl Processor {
    pub fn new(buffer: Buffer, counter: Counter, include_router_logs: bool) -> Self {
        Self {
            buffer,
            counter,
            include_router_logs,
        }
    }

    /// Run indefinitely.
    pub async fn run(self) {
        loop {
            let envelope = self.buffer.pop().await;
            self.process(envelope);
        }
    }

    fn process(&self, envelope: Envelope) {
        if envelope.event_kind != EventKind::Log {
            return;
        }

        if !self.include_router_logs && envelope.source_type == ROUTER_SOURCE_TYPE {
            return;
        }

        self.counter
            .inc(&format!("{}/{}", envelope.app_guid, envelope.source_instance));
    }
}

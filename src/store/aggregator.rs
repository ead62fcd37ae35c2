use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Rate, RateCounter, RateNotFound, RateStore};

/// Snapshots the counter on interval boundaries and retains a bounded ring of
/// time-stamped buckets.
///
/// All nozzles running the same polling interval land on identical bucket
/// boundaries, so a collector can ask every one of them for a single
/// timestamp and get comparable data.
///
/// Cloning is cheap — clones share the same ring.
#[derive(Clone)]
pub struct Aggregator {
    counter: Arc<dyn RateCounter>,
    polling_interval: Duration,
    max_rate_buckets: usize,
    data: Arc<RwLock<VecDeque<Rate>>>,
}

impl Aggregator {
    pub fn new(
        counter: Arc<dyn RateCounter>,
        polling_interval: Duration,
        max_rate_buckets: usize,
    ) -> Self {
        Self {
            counter,
            polling_interval,
            max_rate_buckets,
            data: Arc::new(RwLock::new(VecDeque::with_capacity(max_rate_buckets))),
        }
    }

    /// Drive the bucketing loop. Never returns.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(until_next_boundary(self.polling_interval)).await;

            let timestamp = truncate(unix_now(), self.polling_interval);
            let counts = self.counter.reset();

            self.push_bucket(Rate { timestamp, counts }).await;
        }
    }

    async fn push_bucket(&self, rate: Rate) {
        let mut data = self.data.write().await;
        if data.len() == self.max_rate_buckets {
            data.pop_front();
        }
        data.push_back(rate);
    }
}

#[async_trait]
impl RateStore for Aggregator {
    /// Buckets are appended in boundary order, so the ring is already
    /// ascending.
    async fn rates(&self) -> Vec<Rate> {
        self.data.read().await.iter().cloned().collect()
    }

    /// Matches by containment in `[timestamp, timestamp + interval)`, not by
    /// equality, so a caller holding an arbitrary instant inside a window
    /// still finds its bucket. Callers who want strict matching truncate
    /// first.
    async fn rate(&self, timestamp: i64) -> Result<Rate, RateNotFound> {
        let span = window_secs(self.polling_interval);
        let data = self.data.read().await;
        data.iter()
            .rev()
            .find(|r| r.timestamp <= timestamp && timestamp < r.timestamp + span)
            .cloned()
            .ok_or(RateNotFound)
    }
}

/// Bucket stamps are whole seconds, so sub-second intervals round the window
/// span up to one second to keep containment meaningful.
fn window_secs(interval: Duration) -> i64 {
    interval.as_secs().max(1) as i64
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Floor `now` to a multiple of `interval`, in whole epoch seconds.
fn truncate(now: Duration, interval: Duration) -> i64 {
    let step = interval.as_nanos().max(1);
    let nanos = now.as_nanos();
    let floored = nanos - nanos % step;
    (floored / 1_000_000_000) as i64
}

/// Time remaining until the next interval boundary. A caller sitting exactly
/// on a boundary waits one full interval.
fn until_next_boundary(interval: Duration) -> Duration {
    let step = interval.as_nanos().max(1);
    let rem = unix_now().as_nanos() % step;
    Duration::from_nanos((step - rem) as u64)
}

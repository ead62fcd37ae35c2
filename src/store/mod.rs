pub mod aggregator;
pub mod counter;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aggregator::Aggregator;
pub use counter::{Counter, RateCounter};

/// Per-instance log counts over one polling interval, stamped with the start
/// of the window in whole epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub timestamp: i64,
    pub counts: HashMap<String, u64>,
}

/// Returned when no retained window contains the requested timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate not found")]
pub struct RateNotFound;

/// Read access to retained rate buckets, as served over HTTP by the nozzle.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// All stored buckets, ascending by timestamp.
    async fn rates(&self) -> Vec<Rate>;

    /// The single bucket whose window contains `timestamp`.
    async fn rate(&self, timestamp: i64) -> Result<Rate, RateNotFound>;
}

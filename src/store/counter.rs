use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Anything the aggregator can drain counts from.
pub trait RateCounter: Send + Sync {
    /// Return the current counts, leaving an empty map behind. No increment
    /// that completes before the reset is lost, and no increment that starts
    /// after it is included in the returned map.
    fn reset(&self) -> HashMap<String, u64>;
}

/// Concurrent per-instance log counter.
///
/// Cloning is cheap — clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    data: Arc<Mutex<HashMap<String, u64>>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the count for an instance id, starting from zero on first use.
    pub fn inc(&self, id: &str) {
        let mut data = self.data.lock().unwrap();
        *data.entry(id.to_string()).or_insert(0) += 1;
    }
}

impl RateCounter for Counter {
    fn reset(&self) -> HashMap<String, u64> {
        let mut data = self.data.lock().unwrap();
        std::mem::take(&mut *data)
    }
}

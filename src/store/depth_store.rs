use std::collections::VecDeque;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

use crate::domain::DepthSnapshot;
use crate::error::{CacheError, CacheResult};

/// FIFO history of order-book snapshots for one symbol.
pub struct DepthSnapshotStore {
    symbol: String,
    capacity: usize,
    snapshots: Mutex<VecDeque<DepthSnapshot>>,
}

impl DepthSnapshotStore {
    pub fn new(symbol: &str, capacity: usize) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CacheError::capacity("depth store", capacity))?;
        Ok(Self::with_capacity(symbol, capacity))
    }

    pub fn with_capacity(symbol: &str, capacity: NonZeroUsize) -> Self {
        Self {
            symbol: symbol.to_string(),
            capacity: capacity.get(),
            snapshots: Mutex::new(VecDeque::with_capacity(capacity.get())),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn push(&self, snapshot: DepthSnapshot) {
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() == self.capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<DepthSnapshot> {
        self.snapshots.lock().back().cloned()
    }

    /// The most recent `count` snapshots, oldest first.
    pub fn history(&self, count: usize) -> Vec<DepthSnapshot> {
        let snapshots = self.snapshots.lock();
        let skip = snapshots.len().saturating_sub(count);
        snapshots.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

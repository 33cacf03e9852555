use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use parking_lot::Mutex;

use crate::domain::{Bar, SeriesKey};
use crate::error::{CacheError, CacheResult};

/// Fixed-capacity, open-time ordered bar store for one (symbol, interval).
///
/// The lock is held for the in-memory operation only; every read hands back
/// an owned copy so callers never hold it while doing I/O.
pub struct BoundedSeriesStore {
    key: SeriesKey,
    capacity: usize,
    bars: Mutex<BTreeMap<i64, Bar>>,
}

impl BoundedSeriesStore {
    pub fn new(key: SeriesKey, capacity: usize) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CacheError::capacity("series store", capacity))?;
        Ok(Self::with_capacity(key, capacity))
    }

    pub fn with_capacity(key: SeriesKey, capacity: NonZeroUsize) -> Self {
        Self {
            key,
            capacity: capacity.get(),
            bars: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or overwrite by `open_time`. Returns true when the key was new.
    pub fn upsert(&self, bar: Bar) -> bool {
        let mut bars = self.bars.lock();
        Self::upsert_locked(&mut bars, bar, self.capacity)
    }

    /// Upsert from the live feed. A provisional bar never replaces a closed
    /// one for the same open time. Returns false when the update was dropped.
    pub fn upsert_live(&self, bar: Bar) -> bool {
        let mut bars = self.bars.lock();
        if !bar.is_closed && bars.get(&bar.open_time).is_some_and(|stored| stored.is_closed) {
            return false;
        }
        Self::upsert_locked(&mut bars, bar, self.capacity);
        true
    }

    /// Bulk upsert under a single lock. Returns how many keys were new.
    pub fn extend<I>(&self, bars_in: I) -> usize
    where
        I: IntoIterator<Item = Bar>,
    {
        let mut bars = self.bars.lock();
        bars_in
            .into_iter()
            .filter(|bar| Self::upsert_locked(&mut bars, bar.clone(), self.capacity))
            .count()
    }

    fn upsert_locked(bars: &mut BTreeMap<i64, Bar>, bar: Bar, capacity: usize) -> bool {
        let inserted_new = bars.insert(bar.open_time, bar).is_none();
        while bars.len() > capacity {
            bars.pop_first();
        }
        inserted_new
    }

    pub fn latest(&self) -> Option<Bar> {
        self.bars.lock().last_key_value().map(|(_, bar)| bar.clone())
    }

    /// Bars with `start <= open_time <= end`, ascending.
    pub fn range(&self, start: i64, end: i64) -> Vec<Bar> {
        if end < start {
            return Vec::new();
        }
        self.bars
            .lock()
            .range(start..=end)
            .map(|(_, bar)| bar.clone())
            .collect()
    }

    /// The most recent `n` bars, ascending.
    pub fn tail(&self, n: usize) -> Vec<Bar> {
        let bars = self.bars.lock();
        let skip = bars.len().saturating_sub(n);
        bars.values().skip(skip).cloned().collect()
    }

    /// (min, max) open time of the retained bars. Recomputed from the map on
    /// every call, so it follows eviction.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        let bars = self.bars.lock();
        let min = *bars.first_key_value()?.0;
        let max = *bars.last_key_value()?.0;
        Some((min, max))
    }

    pub fn count(&self) -> usize {
        self.bars.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

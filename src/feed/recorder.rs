use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::PersistentArchive;
use crate::config::ARCHIVE;
use crate::domain::{Bar, DepthSnapshot, SeriesKey};
use crate::feed::FeedListener;

/// Persists closed live bars and every depth snapshot into the archive.
/// Provisional bars are ignored.
pub struct ArchiveRecorder {
    archive: Arc<PersistentArchive>,
    bars_stored: AtomicU64,
    depths_stored: AtomicU64,
    failures: AtomicU64,
}

impl ArchiveRecorder {
    pub fn new(archive: Arc<PersistentArchive>) -> Self {
        Self {
            archive,
            bars_stored: AtomicU64::new(0),
            depths_stored: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn bars_stored(&self) -> u64 {
        self.bars_stored.load(Ordering::Relaxed)
    }

    pub fn depths_stored(&self) -> u64 {
        self.depths_stored.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl FeedListener for ArchiveRecorder {
    fn on_bar(&self, key: &SeriesKey, bar: &Bar) {
        if !bar.is_closed {
            return;
        }
        match self.archive.append_bars(key, std::slice::from_ref(bar)) {
            Ok(_) => {
                let stored = self.bars_stored.fetch_add(1, Ordering::Relaxed) + 1;
                if stored.is_multiple_of(ARCHIVE.recorder_log_every_bars) {
                    log::info!("Stored {} bars", stored);
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{} failed to archive bar {}: {}", key, bar.open_time, e);
            }
        }
    }

    fn on_depth(&self, symbol: &str, snapshot: &DepthSnapshot) {
        match self.archive.append_depth(symbol, std::slice::from_ref(snapshot)) {
            Ok(_) => {
                let stored = self.depths_stored.fetch_add(1, Ordering::Relaxed) + 1;
                if stored.is_multiple_of(ARCHIVE.recorder_log_every_depths) {
                    log::info!("Stored {} depth snapshots", stored);
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{} failed to archive depth {}: {}", symbol, snapshot.timestamp, e);
            }
        }
    }

    // Replayed rows are already in the archive.
    fn accepts_replay(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "archive recorder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interval;

    #[test]
    fn only_closed_bars_reach_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(PersistentArchive::new(dir.path()));
        let recorder = ArchiveRecorder::new(archive.clone());
        let key = SeriesKey::new("btcusdt", Interval::M1);

        let mut live = Bar::closed(0, 60_000, 1.0, 1.0);
        live.is_closed = false;
        recorder.on_bar(&key, &live);
        recorder.on_bar(&key, &live);
        assert_eq!(recorder.bars_stored(), 0);
        assert!(archive.read_bars(&key, 0, i64::MAX).is_empty());

        recorder.on_bar(&key, &Bar::closed(0, 60_000, 1.2, 1.0));
        assert_eq!(recorder.bars_stored(), 1);
        assert_eq!(archive.read_bars(&key, 0, i64::MAX).len(), 1);
    }

    #[test]
    fn depth_snapshots_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(PersistentArchive::new(dir.path()));
        let recorder = ArchiveRecorder::new(archive.clone());
        recorder.on_depth("btcusdt", &DepthSnapshot::new(3, vec![1.0], vec![2.0], vec![1.1], vec![3.0]));
        assert_eq!(recorder.depths_stored(), 1);
        assert_eq!(archive.read_depth("btcusdt", 0, 10).len(), 1);
    }
}

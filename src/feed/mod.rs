//! Live-feed fan-out.
//!
//! Producers (a venue connection, archive replay) publish bars and depth
//! snapshots into a `FeedHub`; every registered listener sees them in arrival
//! order. A given open time may arrive many times while provisional and once
//! more when `is_closed` turns true.

pub mod recorder;
pub mod replay;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

#[cfg(debug_assertions)]
use crate::config::DEBUG_FLAGS;
use crate::domain::{Bar, DepthSnapshot, SeriesKey};

pub use recorder::ArchiveRecorder;
pub use replay::replay_archive;

/// Consumer side of the feed.
pub trait FeedListener: Send + Sync {
    fn on_bar(&self, key: &SeriesKey, bar: &Bar);

    fn on_depth(&self, _symbol: &str, _snapshot: &DepthSnapshot) {}

    /// Whether bars replayed from the archive should reach this listener.
    fn accepts_replay(&self) -> bool {
        true
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

pub struct FeedHub {
    listeners: RwLock<Vec<Arc<dyn FeedListener>>>,
    stopped: AtomicBool,
    bars_published: AtomicU64,
    bars_replayed: AtomicU64,
    depths_published: AtomicU64,
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedHub {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            stopped: AtomicBool::new(false),
            bars_published: AtomicU64::new(0),
            bars_replayed: AtomicU64::new(0),
            depths_published: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn FeedListener>) {
        log::info!("Feed listener registered: {}", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver a bar to every listener. Returns false once the hub is stopped.
    pub fn publish_bar(&self, key: &SeriesKey, bar: &Bar) -> bool {
        if self.is_stopped() {
            return false;
        }
        #[cfg(debug_assertions)]
        if DEBUG_FLAGS.print_feed_events {
            log::info!(
                "{} bar {} close={} {}",
                key,
                bar.open_time,
                bar.close,
                if bar.is_closed { "CLOSED" } else { "LIVE" }
            );
        }
        for listener in self.listeners.read().iter() {
            listener.on_bar(key, bar);
        }
        self.bars_published.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Deliver an archived bar to the listeners that accept replay. Live
    /// events keep flowing to every listener meanwhile.
    pub fn publish_replayed_bar(&self, key: &SeriesKey, bar: &Bar) -> bool {
        if self.is_stopped() {
            return false;
        }
        for listener in self.listeners.read().iter().filter(|l| l.accepts_replay()) {
            listener.on_bar(key, bar);
        }
        self.bars_replayed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn publish_depth(&self, symbol: &str, snapshot: &DepthSnapshot) -> bool {
        if self.is_stopped() {
            return false;
        }
        for listener in self.listeners.read().iter() {
            listener.on_depth(symbol, snapshot);
        }
        self.depths_published.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Refuse further intake. Events already being delivered finish.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::info!(
                "Feed stopped after {} bar(s) and {} depth snapshot(s)",
                self.bars_published(),
                self.depths_published()
            );
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn bars_published(&self) -> u64 {
        self.bars_published.load(Ordering::Relaxed)
    }

    pub fn bars_replayed(&self) -> u64 {
        self.bars_replayed.load(Ordering::Relaxed)
    }

    pub fn depths_published(&self) -> u64 {
        self.depths_published.load(Ordering::Relaxed)
    }
}

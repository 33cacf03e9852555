//! Debugging feature flags.
//!
//! Toggle individual diagnostics here; keep them `false` by default so release
//! builds remain quiet. Every flag is further gated by `cfg(debug_assertions)`.

pub struct DebugFlags {
    /// Emit one line per gap detected and per page fetched during backfill.
    pub print_gap_details: bool,
    /// Emit archive read/dedup statistics.
    pub print_archive_reads: bool,
    /// Emit one line per live bar (provisional and closed) reaching the hub.
    pub print_feed_events: bool,
    /// Emit the latest signal line after every indicator computation.
    pub print_indicator_signals: bool,
    /// Emit shutdown messages.
    pub print_shutdown: bool,
}

pub const DEBUG_FLAGS: DebugFlags = DebugFlags {
    print_gap_details: false,
    print_archive_reads: false,
    print_feed_events: false,
    print_indicator_signals: false,
    print_shutdown: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_quiet_by_default() {
        let flags = [
            DEBUG_FLAGS.print_gap_details,
            DEBUG_FLAGS.print_archive_reads,
            DEBUG_FLAGS.print_feed_events,
            DEBUG_FLAGS.print_indicator_signals,
            DEBUG_FLAGS.print_shutdown,
        ];
        assert!(flags.iter().all(|on| !on));
    }
}

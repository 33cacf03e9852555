use crate::archive::PersistentArchive;
use crate::domain::SeriesKey;
use crate::feed::FeedHub;

/// Publish archived bars for `key` over [start, end] through the hub as
/// closed bars. Listeners that only want live data (the archive recorder)
/// do not see them. Stops early if the hub is stopped. Returns the number of
/// bars delivered.
pub fn replay_archive(archive: &PersistentArchive, hub: &FeedHub, key: &SeriesKey, start: i64, end: i64) -> usize {
    let bars = archive.read_bars(key, start, end);
    let total = bars.len();
    let mut delivered = 0;
    for mut bar in bars {
        bar.is_closed = true;
        if !hub.publish_replayed_bar(key, &bar) {
            log::info!("{} replay interrupted after {}/{} bars", key, delivered, total);
            break;
        }
        delivered += 1;
    }
    delivered
}

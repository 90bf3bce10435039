use tracing::info;

use crate::watermark_store::WatermarkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionReport {
    pub cutoff_unix: u64,
    pub groups_scanned: usize,
    pub entries_removed: usize,
}

pub fn retention_cutoff(now_unix: u64, horizon_secs: u64) -> u64 {
    now_unix.saturating_sub(horizon_secs)
}

/// Prunes entries older than `horizon_secs` one group at a time, yielding to
/// the runtime between groups so a large table never starves other tasks.
pub async fn sweep_stale_watermarks(
    store: &WatermarkStore,
    now_unix: u64,
    horizon_secs: u64,
) -> RetentionReport {
    let cutoff_unix = retention_cutoff(now_unix, horizon_secs);
    let mut report = RetentionReport {
        cutoff_unix,
        ..RetentionReport::default()
    };
    for group_id in store.group_ids() {
        let removed = store.prune_group_older_than(&group_id, cutoff_unix);
        report.groups_scanned = report.groups_scanned.saturating_add(1);
        report.entries_removed = report.entries_removed.saturating_add(removed);
        tokio::task::yield_now().await;
    }
    info!(
        cutoff_unix,
        groups_scanned = report.groups_scanned,
        entries_removed = report.entries_removed,
        "retention sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::{retention_cutoff, sweep_stale_watermarks};
    use crate::watermark_store::WatermarkStore;

    const DAY: u64 = 86_400;
    const NOW: u64 = 1_700_000_000;

    #[test]
    fn unit_cutoff_saturates_at_zero() {
        assert_eq!(retention_cutoff(100, 1_000), 0);
        assert_eq!(retention_cutoff(NOW, 90 * DAY), NOW - 90 * DAY);
    }

    #[tokio::test]
    async fn functional_ninety_day_horizon_drops_91_day_entry_keeps_89_day_entry() {
        let store = WatermarkStore::new();
        store.record_seen("100", "old", NOW - 91 * DAY);
        store.record_seen("100", "recent", NOW - 89 * DAY);
        store.record_seen("200", "old", NOW - 120 * DAY);

        let report = sweep_stale_watermarks(&store, NOW, 90 * DAY).await;
        assert_eq!(report.groups_scanned, 2);
        assert_eq!(report.entries_removed, 2);
        assert_eq!(store.last_seen("100", "old"), None);
        assert_eq!(store.last_seen("100", "recent"), Some(NOW - 89 * DAY));
        assert_eq!(store.group_ids(), vec!["100"]);
    }
}

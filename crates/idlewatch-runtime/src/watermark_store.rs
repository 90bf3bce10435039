//! In-memory watermark table shared by ingestion, scheduling and retention.
//!
//! All bucket mutation happens under one mutex that is held only for map
//! operations, never across I/O or `.await`. Persistence works from
//! point-in-time [`WatermarkSnapshot`] copies, and unflushed state is tracked
//! with a mutation generation instead of a bare boolean so a write that races
//! with new mutations never clears the dirty state it did not capture.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Immutable deep copy of the store, tagged with the generation it reflects.
pub struct WatermarkSnapshot {
    pub generation: u64,
    pub global_last_run_date: String,
    pub groups: BTreeMap<String, BTreeMap<String, u64>>,
}

impl WatermarkSnapshot {
    pub fn entry_count(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }
}

#[derive(Debug, Default)]
struct WatermarkTable {
    groups: HashMap<String, HashMap<String, u64>>,
    last_run_date: String,
    generation: u64,
    flushed_generation: u64,
}

impl WatermarkTable {
    fn touch(&mut self) {
        self.generation = self.generation.saturating_add(1);
    }
}

#[derive(Debug, Clone, Default)]
/// Cheaply cloneable handle to the shared watermark table.
pub struct WatermarkStore {
    inner: Arc<Mutex<WatermarkTable>>,
}

impl WatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from persisted state. The seeded content counts as flushed.
    pub fn from_snapshot(snapshot: WatermarkSnapshot) -> Self {
        let groups = snapshot
            .groups
            .into_iter()
            .map(|(group_id, users)| (group_id, users.into_iter().collect()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(WatermarkTable {
                groups,
                last_run_date: snapshot.global_last_run_date,
                generation: 0,
                flushed_generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatermarkTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `at` as the latest sighting of `user_id` in `group_id`.
    pub fn record_seen(&self, group_id: &str, user_id: &str, at_unix: u64) {
        let mut table = self.lock();
        match table.groups.get_mut(group_id) {
            Some(bucket) => match bucket.get_mut(user_id) {
                Some(last_seen) => *last_seen = at_unix,
                None => {
                    bucket.insert(user_id.to_string(), at_unix);
                }
            },
            None => {
                let mut bucket = HashMap::new();
                bucket.insert(user_id.to_string(), at_unix);
                table.groups.insert(group_id.to_string(), bucket);
            }
        }
        table.touch();
    }

    pub fn last_seen(&self, group_id: &str, user_id: &str) -> Option<u64> {
        self.lock()
            .groups
            .get(group_id)
            .and_then(|bucket| bucket.get(user_id))
            .copied()
    }

    /// Point-in-time copy of one group's bucket, sorted by user id.
    ///
    /// Each call takes a fresh copy, so iteration can be restarted at will and
    /// never observes a bucket that is half way through an update.
    pub fn iterate_group(&self, group_id: &str) -> Vec<(String, u64)> {
        let table = self.lock();
        let mut entries: Vec<(String, u64)> = table
            .groups
            .get(group_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|(user_id, last_seen)| (user_id.clone(), *last_seen))
                    .collect()
            })
            .unwrap_or_default();
        drop(table);
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }

    pub fn group_ids(&self) -> Vec<String> {
        let mut group_ids: Vec<String> = self.lock().groups.keys().cloned().collect();
        group_ids.sort();
        group_ids
    }

    pub fn entry_count(&self) -> usize {
        self.lock().groups.values().map(HashMap::len).sum()
    }

    pub fn last_run_date(&self) -> String {
        self.lock().last_run_date.clone()
    }

    pub fn set_last_run_date(&self, date: &str) {
        let mut table = self.lock();
        table.last_run_date = date.to_string();
        table.touch();
    }

    /// Clears the daily marker only; watermarks are left untouched.
    pub fn clear_last_run_date(&self) {
        self.set_last_run_date("");
    }

    /// Removes entries seen strictly before `cutoff_unix` in every group.
    pub fn prune_older_than(&self, cutoff_unix: u64) -> usize {
        let mut table = self.lock();
        let mut removed = 0usize;
        table.groups.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|_, last_seen| *last_seen >= cutoff_unix);
            removed = removed.saturating_add(before - bucket.len());
            !bucket.is_empty()
        });
        if removed > 0 {
            table.touch();
        }
        removed
    }

    /// Single-group variant of [`Self::prune_older_than`] for incremental sweeps.
    pub fn prune_group_older_than(&self, group_id: &str, cutoff_unix: u64) -> usize {
        let mut table = self.lock();
        let Some(bucket) = table.groups.get_mut(group_id) else {
            return 0;
        };
        let before = bucket.len();
        bucket.retain(|_, last_seen| *last_seen >= cutoff_unix);
        let removed = before - bucket.len();
        if bucket.is_empty() {
            table.groups.remove(group_id);
        }
        if removed > 0 {
            table.touch();
        }
        removed
    }

    pub fn snapshot(&self) -> WatermarkSnapshot {
        let table = self.lock();
        WatermarkSnapshot {
            generation: table.generation,
            global_last_run_date: table.last_run_date.clone(),
            groups: table
                .groups
                .iter()
                .map(|(group_id, bucket)| {
                    (
                        group_id.clone(),
                        bucket
                            .iter()
                            .map(|(user_id, last_seen)| (user_id.clone(), *last_seen))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_dirty(&self) -> bool {
        let table = self.lock();
        table.generation > table.flushed_generation
    }

    /// Records that a snapshot of `generation` reached durable storage.
    pub fn mark_flushed(&self, generation: u64) {
        let mut table = self.lock();
        if generation > table.flushed_generation {
            table.flushed_generation = generation;
        }
    }
}

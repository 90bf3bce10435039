//! Durable snapshot storage for the watermark table.
//!
//! Loading never fails: a missing file yields empty state, and a corrupt file
//! is logged and replaced by empty state. Saving goes through
//! [`write_text_atomic`] so the previous file survives any failed write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use idlewatch_core::write_text_atomic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::watermark_store::WatermarkSnapshot;

const LAST_RUN_DATE_KEY: &str = "global_last_run_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEpochSeconds")]
struct EpochSeconds(u64);

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum RawEpochSeconds {
    Integer(u64),
    Float(f64),
}

impl TryFrom<RawEpochSeconds> for EpochSeconds {
    type Error = String;

    fn try_from(raw: RawEpochSeconds) -> Result<Self, Self::Error> {
        match raw {
            RawEpochSeconds::Integer(value) => Ok(Self(value)),
            RawEpochSeconds::Float(value) if value.is_finite() && value >= 0.0 => {
                Ok(Self(value.floor() as u64))
            }
            RawEpochSeconds::Float(value) => Err(format!("invalid epoch seconds {value}")),
        }
    }
}

type PersistedGroups = BTreeMap<String, BTreeMap<String, EpochSeconds>>;

#[derive(Debug, Deserialize)]
struct PersistedState {
    #[serde(default)]
    global_last_run_date: String,
    #[serde(default)]
    groups: PersistedGroups,
}

#[derive(Debug, Serialize)]
struct PersistedStateRef<'a> {
    global_last_run_date: &'a str,
    groups: &'a BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// How the state file was interpreted at load time.
pub enum LoadSource {
    Missing,
    Current,
    /// Flat `{group: {user: ts}}` layout written before the daily marker existed.
    Legacy,
    Corrupt { reason: String },
    Unreadable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedState {
    pub snapshot: WatermarkSnapshot,
    pub source: LoadSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one save attempt. Failures are reported, never raised.
pub enum SaveOutcome {
    Written { generation: u64 },
    SkippedStale { generation: u64, latest_written: u64 },
    Failed { generation: u64, error: String },
}

impl SaveOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

fn into_snapshot(global_last_run_date: String, groups: PersistedGroups) -> WatermarkSnapshot {
    WatermarkSnapshot {
        generation: 0,
        global_last_run_date,
        groups: groups
            .into_iter()
            .map(|(group_id, users)| {
                (
                    group_id,
                    users
                        .into_iter()
                        .map(|(user_id, last_seen)| (user_id, last_seen.0))
                        .collect(),
                )
            })
            .collect(),
    }
}

/// Parses state file content, accepting the current and the legacy layout.
pub fn parse_state_document(raw: &str) -> Result<(WatermarkSnapshot, LoadSource)> {
    let document: Value = serde_json::from_str(raw).context("state file is not valid JSON")?;
    let Some(object) = document.as_object() else {
        bail!("state file root must be an object");
    };
    if object.contains_key(LAST_RUN_DATE_KEY) {
        let state: PersistedState =
            serde_json::from_value(document).context("state file has an unexpected shape")?;
        return Ok((
            into_snapshot(state.global_last_run_date, state.groups),
            LoadSource::Current,
        ));
    }
    let groups: PersistedGroups =
        serde_json::from_value(document).context("legacy state file has an unexpected shape")?;
    Ok((into_snapshot(String::new(), groups), LoadSource::Legacy))
}

/// Renders a snapshot in the on-disk layout.
pub fn render_state_document(snapshot: &WatermarkSnapshot) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(&PersistedStateRef {
        global_last_run_date: &snapshot.global_last_run_date,
        groups: &snapshot.groups,
    })
    .context("failed to serialize watermark snapshot")?;
    rendered.push('\n');
    Ok(rendered)
}

/// Loads persisted state, falling back to empty defaults on any problem.
pub fn load_state(path: &Path) -> LoadedState {
    if !path.exists() {
        info!(path = %path.display(), "no state file found; starting with empty watermarks");
        return LoadedState {
            snapshot: WatermarkSnapshot::default(),
            source: LoadSource::Missing,
        };
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            error!(path = %path.display(), %error, "failed to read state file; starting fresh");
            return LoadedState {
                snapshot: WatermarkSnapshot::default(),
                source: LoadSource::Unreadable {
                    reason: error.to_string(),
                },
            };
        }
    };
    match parse_state_document(&raw) {
        Ok((snapshot, source)) => {
            if source == LoadSource::Legacy {
                warn!(path = %path.display(), "state file uses the legacy layout; it will be rewritten on next flush");
            }
            info!(
                path = %path.display(),
                groups = snapshot.groups.len(),
                entries = snapshot.entry_count(),
                last_run_date = %snapshot.global_last_run_date,
                "loaded watermark state"
            );
            LoadedState { snapshot, source }
        }
        Err(error) => {
            error!(path = %path.display(), error = %format!("{error:#}"), "state file is corrupt; starting fresh");
            LoadedState {
                snapshot: WatermarkSnapshot::default(),
                source: LoadSource::Corrupt {
                    reason: format!("{error:#}"),
                },
            }
        }
    }
}

#[derive(Debug)]
struct PersisterState {
    latest_written: Option<u64>,
    last_success: Instant,
}

#[derive(Debug)]
/// Serializes snapshot writes to one state file.
///
/// Writes are ordered by snapshot generation: once a newer snapshot has been
/// written, an older one that arrives later is skipped.
pub struct StatePersister {
    path: PathBuf,
    state: Mutex<PersisterState>,
}

impl StatePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(PersisterState {
                latest_written: None,
                last_success: Instant::now(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, PersisterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load(&self) -> LoadedState {
        load_state(&self.path)
    }

    /// Writes `snapshot` atomically. Blocks on file I/O; call off the hot path.
    pub fn save(&self, snapshot: &WatermarkSnapshot) -> SaveOutcome {
        let mut state = self.lock();
        if let Some(latest_written) = state.latest_written {
            if snapshot.generation < latest_written {
                debug!(
                    generation = snapshot.generation,
                    latest_written, "skipping stale watermark snapshot"
                );
                return SaveOutcome::SkippedStale {
                    generation: snapshot.generation,
                    latest_written,
                };
            }
        }
        let result = render_state_document(snapshot)
            .and_then(|rendered| write_text_atomic(&self.path, &rendered));
        match result {
            Ok(()) => {
                state.latest_written = Some(snapshot.generation);
                state.last_success = Instant::now();
                debug!(
                    path = %self.path.display(),
                    generation = snapshot.generation,
                    entries = snapshot.entry_count(),
                    "watermark snapshot written"
                );
                SaveOutcome::Written {
                    generation: snapshot.generation,
                }
            }
            Err(error) => {
                let error = format!("{error:#}");
                error!(path = %self.path.display(), %error, "failed to persist watermark snapshot");
                SaveOutcome::Failed {
                    generation: snapshot.generation,
                    error,
                }
            }
        }
    }

    pub fn elapsed_since_last_success(&self) -> Duration {
        self.lock().last_success.elapsed()
    }
}

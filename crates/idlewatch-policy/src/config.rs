use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::diagnostics::ConfigDiagnostic;

pub const DEFAULT_PUSH_TIME: &str = "09:00";
pub const DEFAULT_TIMEOUT_DAYS: f64 = 1.0;
pub const DEFAULT_ALERT_TEMPLATE: &str =
    "{nickname} has been silent for {days} day(s) (last seen {last_seen})";
pub const DEFAULT_DIGEST_HEADER: &str = "📢 Daily inactivity digest:";
pub const DEFAULT_CATCH_UP_HOURS: f64 = 3.0;
pub const DEFAULT_CLEANUP_DAYS: u64 = 90;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: f64 = 1.0;
pub const DEFAULT_INTER_GROUP_DELAY_SECS: f64 = 2.0;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// What to do when the first check of the day lands past the catch-up window.
pub enum MissedWindowPolicy {
    /// Mark the day as run without sending anything.
    #[default]
    Skip,
    /// Mark the day as run and send the digest late.
    SendLate,
}

impl MissedWindowPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::SendLate => "send_late",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Operator configuration as written on disk.
///
/// Id lists and the alias table stay as raw JSON values here; they accept
/// several shapes and are normalized entry by entry during policy rebuild.
/// Scalar fields are read one at a time: a value of the wrong type keeps the
/// field's default and is recorded in `rejected_fields`.
pub struct MonitorConfig {
    pub monitored_groups: Value,
    pub enable_whitelist: bool,
    pub whitelist_exception_groups: Value,
    pub nickname_mapping: Value,
    pub enable_nickname_mapping: bool,
    pub push_time: String,
    pub timeout_days: f64,
    pub alert_template: String,
    pub digest_header: String,
    pub timezone: String,
    pub catch_up_hours: f64,
    pub missed_window_policy: MissedWindowPolicy,
    pub silent_recheck: bool,
    pub cleanup_days: u64,
    pub max_retries: usize,
    pub retry_backoff_secs: f64,
    pub inter_group_delay_secs: f64,
    pub send_timeout_secs: u64,
    pub flush_interval_secs: u64,
    pub tick_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub rejected_fields: Vec<ConfigDiagnostic>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitored_groups: Value::Array(Vec::new()),
            enable_whitelist: true,
            whitelist_exception_groups: Value::Array(Vec::new()),
            nickname_mapping: Value::Array(Vec::new()),
            enable_nickname_mapping: true,
            push_time: DEFAULT_PUSH_TIME.to_string(),
            timeout_days: DEFAULT_TIMEOUT_DAYS,
            alert_template: DEFAULT_ALERT_TEMPLATE.to_string(),
            digest_header: DEFAULT_DIGEST_HEADER.to_string(),
            timezone: String::new(),
            catch_up_hours: DEFAULT_CATCH_UP_HOURS,
            missed_window_policy: MissedWindowPolicy::Skip,
            silent_recheck: true,
            cleanup_days: DEFAULT_CLEANUP_DAYS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            inter_group_delay_secs: DEFAULT_INTER_GROUP_DELAY_SECS,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            rejected_fields: Vec::new(),
        }
    }
}

impl<'de> Deserialize<'de> for MonitorConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_entries(entries))
    }
}

impl MonitorConfig {
    /// Builds a config from top-level entries, defaulting each mistyped field.
    pub fn from_entries(mut entries: Map<String, Value>) -> Self {
        let mut config = Self::default();
        let mut reader = FieldReader {
            entries: &mut entries,
            rejected: Vec::new(),
        };

        for (field, slot) in [
            ("monitored_groups", &mut config.monitored_groups),
            ("whitelist_exception_groups", &mut config.whitelist_exception_groups),
            ("nickname_mapping", &mut config.nickname_mapping),
        ] {
            if let Some(value) = reader.take(field) {
                *slot = value;
            }
        }
        for (field, slot) in [
            ("enable_whitelist", &mut config.enable_whitelist),
            ("enable_nickname_mapping", &mut config.enable_nickname_mapping),
            ("silent_recheck", &mut config.silent_recheck),
        ] {
            reader.read(field, slot, Value::as_bool, "a boolean");
        }
        for (field, slot) in [
            ("push_time", &mut config.push_time),
            ("alert_template", &mut config.alert_template),
            ("digest_header", &mut config.digest_header),
            ("timezone", &mut config.timezone),
        ] {
            reader.read(field, slot, |value| value.as_str().map(str::to_string), "a string");
        }
        for (field, slot) in [
            ("timeout_days", &mut config.timeout_days),
            ("catch_up_hours", &mut config.catch_up_hours),
            ("retry_backoff_secs", &mut config.retry_backoff_secs),
            ("inter_group_delay_secs", &mut config.inter_group_delay_secs),
        ] {
            reader.read(field, slot, Value::as_f64, "a number");
        }
        for (field, slot) in [
            ("cleanup_days", &mut config.cleanup_days),
            ("send_timeout_secs", &mut config.send_timeout_secs),
            ("flush_interval_secs", &mut config.flush_interval_secs),
            ("tick_interval_secs", &mut config.tick_interval_secs),
            ("cleanup_interval_secs", &mut config.cleanup_interval_secs),
        ] {
            reader.read(field, slot, whole_number, "a non-negative whole number");
        }
        reader.read(
            "max_retries",
            &mut config.max_retries,
            |value| whole_number(value).and_then(|count| usize::try_from(count).ok()),
            "a non-negative whole number",
        );
        reader.read(
            "missed_window_policy",
            &mut config.missed_window_policy,
            |value| MissedWindowPolicy::deserialize(value).ok(),
            "\"skip\" or \"send_late\"",
        );

        config.rejected_fields = reader.rejected;
        config
    }
}

struct FieldReader<'a> {
    entries: &'a mut Map<String, Value>,
    rejected: Vec<ConfigDiagnostic>,
}

impl FieldReader<'_> {
    /// Removes a field; `null` counts as absent.
    fn take(&mut self, field: &str) -> Option<Value> {
        self.entries.remove(field).filter(|value| !value.is_null())
    }

    fn read<T, F>(&mut self, field: &str, slot: &mut T, convert: F, expected: &str)
    where
        T: std::fmt::Debug,
        F: FnOnce(&Value) -> Option<T>,
    {
        let Some(value) = self.take(field) else {
            return;
        };
        match convert(&value) {
            Some(converted) => *slot = converted,
            None => self.rejected.push(ConfigDiagnostic::error(
                field,
                format!("expected {expected}, found {value}; falling back to {slot:?}"),
            )),
        }
    }
}

/// Accepts integers and integral floats such as `90.0`.
fn whole_number(value: &Value) -> Option<u64> {
    if let Some(number) = value.as_u64() {
        return Some(number);
    }
    let float = value.as_f64()?;
    let in_range = float.is_finite() && float >= 0.0 && float <= u64::MAX as f64;
    (in_range && float.fract() == 0.0).then_some(float as u64)
}

#[derive(Debug, Error)]
/// Enumerates failures of a configuration source.
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file {} is not valid TOML: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Supplies the current operator configuration.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<MonitorConfig, ConfigError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
/// Re-reads a JSON (or `.toml`) file on every load so edits apply without restart.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<MonitorConfig, ConfigError> {
        load_monitor_config(&self.path)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: MonitorConfig,
}

impl StaticConfigSource {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<MonitorConfig, ConfigError> {
        Ok(self.config.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Loads a config file, selecting TOML for `.toml` paths and JSON otherwise.
pub fn load_monitor_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str::<MonitorConfig>(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str::<MonitorConfig>(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

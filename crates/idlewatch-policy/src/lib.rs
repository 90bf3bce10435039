//! Monitoring policy and configuration for idlewatch.
//!
//! Turns loosely-typed operator configuration into a validated
//! [`ResolvedSettings`] snapshot: which groups are monitored, which members
//! count under whitelist mode, display aliases, and the digest schedule.
//! Every malformed value is recovered locally and reported as a
//! [`ConfigDiagnostic`] instead of failing the whole rebuild.

pub mod alias_entries;
pub mod config;
pub mod diagnostics;
pub mod policy;
pub mod push_time;
pub mod settings;

pub use alias_entries::{parse_alias_table, parse_id_set, scalar_to_id, split_alias_entry};
pub use config::{
    load_monitor_config, ConfigError, ConfigSource, FileConfigSource, MissedWindowPolicy,
    MonitorConfig, StaticConfigSource,
};
pub use diagnostics::{log_config_diagnostics, ConfigDiagnostic, DiagnosticSeverity};
pub use policy::{MonitoringPolicy, MonitoringPolicyBuilder};
pub use push_time::PushTime;
pub use settings::{DigestSettings, ResolvedSettings, SettingsHandle};

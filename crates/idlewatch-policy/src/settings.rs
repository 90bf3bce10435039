use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use idlewatch_core::{days_to_seconds, DeploymentTimezone, SECONDS_PER_DAY};

use crate::config::{
    MissedWindowPolicy, MonitorConfig, DEFAULT_ALERT_TEMPLATE, DEFAULT_CATCH_UP_HOURS,
    DEFAULT_CLEANUP_DAYS, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_FLUSH_INTERVAL_SECS,
    DEFAULT_INTER_GROUP_DELAY_SECS, DEFAULT_RETRY_BACKOFF_SECS, DEFAULT_SEND_TIMEOUT_SECS,
    DEFAULT_TICK_INTERVAL_SECS, DEFAULT_TIMEOUT_DAYS,
};
use crate::diagnostics::ConfigDiagnostic;
use crate::policy::MonitoringPolicy;
use crate::push_time::PushTime;

const MAX_CATCH_UP_HOURS: f64 = 24.0;
const MAX_DELAY_SECS: f64 = 3_600.0;

#[derive(Debug, Clone, PartialEq)]
/// Validated digest, scheduling and maintenance settings.
pub struct DigestSettings {
    pub push_time: PushTime,
    pub timeout_days: f64,
    pub alert_template: String,
    pub digest_header: String,
    pub timezone: DeploymentTimezone,
    pub catch_up_window: Duration,
    pub missed_window_policy: MissedWindowPolicy,
    pub silent_recheck: bool,
    pub cleanup_days: u64,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub inter_group_delay: Duration,
    pub send_timeout: Duration,
    pub flush_interval: Duration,
    pub tick_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for DigestSettings {
    fn default() -> Self {
        let (settings, _) = Self::resolve(&MonitorConfig::default());
        settings
    }
}

impl DigestSettings {
    pub fn resolve(config: &MonitorConfig) -> (Self, Vec<ConfigDiagnostic>) {
        let mut diagnostics = Vec::new();

        let push_time = match PushTime::parse(&config.push_time) {
            Ok(push_time) => push_time,
            Err(error) => {
                diagnostics.push(ConfigDiagnostic::error(
                    "push_time",
                    format!("{error:#}; falling back to {}", PushTime::DEFAULT),
                ));
                PushTime::DEFAULT
            }
        };

        let timeout_days = if config.timeout_days.is_finite() && config.timeout_days > 0.0 {
            config.timeout_days
        } else {
            diagnostics.push(ConfigDiagnostic::error(
                "timeout_days",
                format!(
                    "{} is not a positive number; falling back to {DEFAULT_TIMEOUT_DAYS}",
                    config.timeout_days
                ),
            ));
            DEFAULT_TIMEOUT_DAYS
        };

        let alert_template = if config.alert_template.trim().is_empty() {
            diagnostics.push(ConfigDiagnostic::warning(
                "alert_template",
                "template is empty; using the default template",
            ));
            DEFAULT_ALERT_TEMPLATE.to_string()
        } else {
            config.alert_template.clone()
        };

        let timezone = match DeploymentTimezone::parse(&config.timezone) {
            Ok(timezone) => timezone,
            Err(error) => {
                diagnostics.push(ConfigDiagnostic::error(
                    "timezone",
                    format!("{error}; falling back to the host local timezone"),
                ));
                DeploymentTimezone::Local
            }
        };

        let catch_up_hours = bounded_or_default(
            "catch_up_hours",
            config.catch_up_hours,
            MAX_CATCH_UP_HOURS,
            DEFAULT_CATCH_UP_HOURS,
            &mut diagnostics,
        );
        let cleanup_days = if config.cleanup_days == 0 {
            diagnostics.push(ConfigDiagnostic::error(
                "cleanup_days",
                format!("must be at least 1; falling back to {DEFAULT_CLEANUP_DAYS}"),
            ));
            DEFAULT_CLEANUP_DAYS
        } else {
            config.cleanup_days
        };
        let max_retries = if config.max_retries == 0 {
            diagnostics.push(ConfigDiagnostic::error(
                "max_retries",
                "must be at least 1; sending with a single attempt",
            ));
            1
        } else {
            config.max_retries
        };

        let settings = Self {
            push_time,
            timeout_days,
            alert_template,
            digest_header: config.digest_header.clone(),
            timezone,
            catch_up_window: Duration::from_secs_f64(catch_up_hours * 3_600.0),
            missed_window_policy: config.missed_window_policy,
            silent_recheck: config.silent_recheck,
            cleanup_days,
            max_retries,
            retry_backoff: Duration::from_secs_f64(bounded_or_default(
                "retry_backoff_secs",
                config.retry_backoff_secs,
                MAX_DELAY_SECS,
                DEFAULT_RETRY_BACKOFF_SECS,
                &mut diagnostics,
            )),
            inter_group_delay: Duration::from_secs_f64(bounded_or_default(
                "inter_group_delay_secs",
                config.inter_group_delay_secs,
                MAX_DELAY_SECS,
                DEFAULT_INTER_GROUP_DELAY_SECS,
                &mut diagnostics,
            )),
            send_timeout: positive_secs_or_default(
                "send_timeout_secs",
                config.send_timeout_secs,
                DEFAULT_SEND_TIMEOUT_SECS,
                &mut diagnostics,
            ),
            flush_interval: positive_secs_or_default(
                "flush_interval_secs",
                config.flush_interval_secs,
                DEFAULT_FLUSH_INTERVAL_SECS,
                &mut diagnostics,
            ),
            tick_interval: positive_secs_or_default(
                "tick_interval_secs",
                config.tick_interval_secs,
                DEFAULT_TICK_INTERVAL_SECS,
                &mut diagnostics,
            ),
            cleanup_interval: positive_secs_or_default(
                "cleanup_interval_secs",
                config.cleanup_interval_secs,
                DEFAULT_CLEANUP_INTERVAL_SECS,
                &mut diagnostics,
            ),
        };
        (settings, diagnostics)
    }

    pub fn timeout_seconds(&self) -> f64 {
        days_to_seconds(self.timeout_days)
    }

    pub fn cleanup_horizon_seconds(&self) -> u64 {
        self.cleanup_days.saturating_mul(SECONDS_PER_DAY)
    }

    /// Catch-up window in whole minutes, the resolution the scheduler works at.
    pub fn catch_up_minutes(&self) -> u32 {
        u32::try_from(self.catch_up_window.as_secs() / 60).unwrap_or(u32::MAX)
    }
}

fn bounded_or_default(
    field: &str,
    value: f64,
    max: f64,
    default: f64,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> f64 {
    if value.is_finite() && (0.0..=max).contains(&value) {
        return value;
    }
    diagnostics.push(ConfigDiagnostic::error(
        field,
        format!("{value} is outside 0..={max}; falling back to {default}"),
    ));
    default
}

fn positive_secs_or_default(
    field: &str,
    value: u64,
    default: u64,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> Duration {
    if value > 0 {
        return Duration::from_secs(value);
    }
    diagnostics.push(ConfigDiagnostic::error(
        field,
        format!("must be greater than 0; falling back to {default}"),
    ));
    Duration::from_secs(default)
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Policy plus digest settings resolved from one configuration snapshot.
pub struct ResolvedSettings {
    pub policy: MonitoringPolicy,
    pub digest: DigestSettings,
}

impl ResolvedSettings {
    pub fn resolve(config: &MonitorConfig) -> (Self, Vec<ConfigDiagnostic>) {
        let mut diagnostics = config.rejected_fields.clone();
        let (policy, policy_diagnostics) = MonitoringPolicy::rebuild(config);
        let (digest, digest_diagnostics) = DigestSettings::resolve(config);
        diagnostics.extend(policy_diagnostics);
        diagnostics.extend(digest_diagnostics);
        (Self { policy, digest }, diagnostics)
    }
}

#[derive(Debug, Clone)]
/// Lock-free shared view of the active settings.
///
/// Readers on the ingestion path take a cheap `Arc` snapshot; rebuilds replace
/// the whole value so nobody observes a partially updated policy.
pub struct SettingsHandle {
    current: Arc<ArcSwap<ResolvedSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: ResolvedSettings) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    pub fn load(&self) -> Arc<ResolvedSettings> {
        self.current.load_full()
    }

    pub fn replace(&self, settings: ResolvedSettings) {
        self.current.store(Arc::new(settings));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{DigestSettings, ResolvedSettings, SettingsHandle};
    use crate::config::MonitorConfig;
    use crate::diagnostics::DiagnosticSeverity;
    use crate::policy::MonitoringPolicy;
    use crate::push_time::PushTime;

    #[test]
    fn unit_defaults_match_documented_values() {
        let settings = DigestSettings::default();
        assert_eq!(settings.push_time, PushTime::DEFAULT);
        assert_eq!(settings.timeout_seconds(), 86_400.0);
        assert_eq!(settings.catch_up_window, Duration::from_secs(3 * 3_600));
        assert_eq!(settings.catch_up_minutes(), 180);
        assert_eq!(settings.cleanup_horizon_seconds(), 90 * 86_400);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_backoff, Duration::from_secs(1));
        assert_eq!(settings.inter_group_delay, Duration::from_secs(2));
        assert_eq!(settings.send_timeout, Duration::from_secs(30));
        assert_eq!(settings.flush_interval, Duration::from_secs(300));
        assert_eq!(settings.tick_interval, Duration::from_secs(60));
    }

    #[test]
    fn regression_invalid_push_time_falls_back_to_nine_with_error_diagnostic() {
        let config = MonitorConfig {
            push_time: "25:99".to_string(),
            ..MonitorConfig::default()
        };
        let (settings, diagnostics) = DigestSettings::resolve(&config);
        assert_eq!(settings.push_time, PushTime::DEFAULT);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].field, "push_time");
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn regression_invalid_numeric_settings_recover_locally() {
        let config = MonitorConfig {
            timeout_days: -1.0,
            timezone: "Nowhere/Special".to_string(),
            tick_interval_secs: 0,
            max_retries: 0,
            ..MonitorConfig::default()
        };
        let (settings, diagnostics) = DigestSettings::resolve(&config);
        assert_eq!(settings.timeout_days, 1.0);
        assert_eq!(settings.tick_interval, Duration::from_secs(60));
        assert_eq!(settings.max_retries, 1);
        let fields: Vec<&str> = diagnostics
            .iter()
            .map(|diagnostic| diagnostic.field.as_str())
            .collect();
        assert_eq!(
            fields,
            vec!["timeout_days", "timezone", "max_retries", "tick_interval_secs"]
        );
    }

    #[test]
    fn regression_mistyped_scalars_keep_groups_and_aliases() {
        let config: MonitorConfig = serde_json::from_value(json!({
            "monitored_groups": ["100"],
            "enable_whitelist": false,
            "nickname_mapping": ["1:Alice"],
            "push_time": 930,
            "cleanup_days": 7.5,
            "silent_recheck": "yes",
        }))
        .expect("parse");
        let (settings, diagnostics) = ResolvedSettings::resolve(&config);

        assert!(settings.policy.is_group_monitored("100"));
        assert!(settings.policy.is_user_tracked("100", "1"));
        assert_eq!(settings.policy.display_name("1"), "Alice");
        assert_eq!(settings.digest.push_time, PushTime::DEFAULT);
        assert_eq!(settings.digest.cleanup_days, 90);
        assert!(settings.digest.silent_recheck);

        let fields: Vec<&str> = diagnostics
            .iter()
            .map(|diagnostic| diagnostic.field.as_str())
            .collect();
        assert_eq!(fields, vec!["silent_recheck", "push_time", "cleanup_days"]);
        assert!(diagnostics
            .iter()
            .all(|diagnostic| diagnostic.severity == DiagnosticSeverity::Error));
    }

    #[test]
    fn functional_settings_handle_swaps_whole_snapshots() {
        let handle = SettingsHandle::new(ResolvedSettings::default());
        let before = handle.load();
        assert!(!before.policy.is_group_monitored("1"));

        handle.replace(ResolvedSettings {
            policy: MonitoringPolicy::builder().monitor_group("1").build(),
            digest: DigestSettings::default(),
        });
        assert!(handle.load().policy.is_group_monitored("1"));
        assert!(!before.policy.is_group_monitored("1"));
    }
}

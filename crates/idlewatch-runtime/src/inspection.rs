//! Inactivity classification, digest rendering and per-group dispatch.

use idlewatch_core::{elapsed_seconds, whole_days};
use idlewatch_policy::{DigestSettings, MonitoringPolicy, ResolvedSettings};
use tracing::{info, warn};

use crate::dispatch::{send_with_retry, DeliveryOutcome, DigestSender, RetryPolicy};
use crate::shutdown::ShutdownSignal;
use crate::watermark_store::WatermarkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionMode {
    Dispatch,
    /// Classify and log only.
    Silent,
}

impl InspectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Silent => "silent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactiveMember {
    pub user_id: String,
    pub display_name: String,
    pub days_silent: u64,
    pub last_seen: u64,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInspection {
    pub group_id: String,
    pub tracked_users: usize,
    pub inactive: Vec<InactiveMember>,
    pub delivery: DeliveryOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of one pass over every monitored group.
pub struct InspectionReport {
    pub now_unix: u64,
    pub mode: InspectionMode,
    pub groups: Vec<GroupInspection>,
}

impl InspectionReport {
    pub fn inactive_total(&self) -> usize {
        self.groups.iter().map(|group| group.inactive.len()).sum()
    }

    pub fn delivered_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| matches!(group.delivery, DeliveryOutcome::Delivered { .. }))
            .count()
    }

    pub fn failed_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| matches!(group.delivery, DeliveryOutcome::Failed { .. }))
            .count()
    }

    pub fn group(&self, group_id: &str) -> Option<&GroupInspection> {
        self.groups.iter().find(|group| group.group_id == group_id)
    }
}

/// Substitutes `{nickname}`, `{days}` and `{last_seen}` in an alert template.
///
/// The template is scanned once, so placeholder text inside a substituted
/// value is emitted as-is. Unknown `{...}` sequences are kept verbatim.
pub fn render_alert_line(template: &str, nickname: &str, days: u64, last_seen: &str) -> String {
    let days = days.to_string();
    let mut rendered = String::with_capacity(template.len() + nickname.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let substitution = [
            ("{nickname}", nickname),
            ("{days}", days.as_str()),
            ("{last_seen}", last_seen),
        ]
        .into_iter()
        .find(|(placeholder, _)| candidate.starts_with(placeholder));
        match substitution {
            Some((placeholder, value)) => {
                rendered.push_str(value);
                rest = &candidate[placeholder.len()..];
            }
            None => {
                rendered.push('{');
                rest = &candidate[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Header followed by one line per inactive member.
pub fn render_digest_message(header: &str, lines: &[String]) -> String {
    let mut message = header.trim_end().to_string();
    for line in lines {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(line);
    }
    message
}

fn is_inactive(age_seconds: u64, settings: &DigestSettings) -> bool {
    age_seconds as f64 >= settings.timeout_seconds()
}

/// Returns `(tracked_users, inactive)` for one group's bucket.
pub fn classify_group(
    store: &WatermarkStore,
    policy: &MonitoringPolicy,
    settings: &DigestSettings,
    group_id: &str,
    now_unix: u64,
) -> (usize, Vec<InactiveMember>) {
    let mut tracked_users = 0usize;
    let mut inactive = Vec::new();
    for (user_id, last_seen) in store.iterate_group(group_id) {
        if !policy.is_user_tracked(group_id, &user_id) {
            continue;
        }
        tracked_users = tracked_users.saturating_add(1);
        let age = elapsed_seconds(last_seen, now_unix);
        if !is_inactive(age, settings) {
            continue;
        }
        let display_name = policy.display_name(&user_id);
        let days_silent = whole_days(age);
        let line = render_alert_line(
            &settings.alert_template,
            &display_name,
            days_silent,
            &settings.timezone.format_unix_seconds(last_seen),
        );
        inactive.push(InactiveMember {
            user_id,
            display_name,
            days_silent,
            last_seen,
            line,
        });
    }
    (tracked_users, inactive)
}

/// Inspects every monitored group in sorted order, dispatching digests when
/// `mode` is [`InspectionMode::Dispatch`].
pub async fn run_inspection(
    store: &WatermarkStore,
    settings: &ResolvedSettings,
    sender: &dyn DigestSender,
    now_unix: u64,
    mode: InspectionMode,
    shutdown: &ShutdownSignal,
) -> InspectionReport {
    let group_ids = settings.policy.monitored_groups();
    let retry_policy = RetryPolicy::from_settings(&settings.digest);
    let mut groups = Vec::with_capacity(group_ids.len());
    let mut cancelled = false;

    for (index, group_id) in group_ids.iter().enumerate() {
        let (tracked_users, inactive) =
            classify_group(store, &settings.policy, &settings.digest, group_id, now_unix);
        if cancelled || shutdown.is_cancelled() {
            cancelled = true;
            groups.push(GroupInspection {
                group_id: group_id.clone(),
                tracked_users,
                inactive,
                delivery: DeliveryOutcome::Cancelled,
            });
            continue;
        }

        let delivery = if inactive.is_empty() {
            DeliveryOutcome::NothingToSend
        } else if mode == InspectionMode::Silent {
            for member in &inactive {
                info!(
                    group_id = %group_id,
                    user_id = %member.user_id,
                    days_silent = member.days_silent,
                    "inactive member (silent check)"
                );
            }
            DeliveryOutcome::Suppressed
        } else {
            let lines: Vec<String> = inactive.iter().map(|member| member.line.clone()).collect();
            let text = render_digest_message(&settings.digest.digest_header, &lines);
            let outcome =
                send_with_retry(sender, group_id, &text, retry_policy, shutdown).await;
            let remaining = index + 1 < group_ids.len();
            if outcome == DeliveryOutcome::Cancelled {
                cancelled = true;
            } else if remaining && !shutdown.sleep(settings.digest.inter_group_delay).await {
                cancelled = true;
            }
            outcome
        };

        info!(
            group_id = %group_id,
            tracked_users,
            inactive = inactive.len(),
            delivery = delivery.as_str(),
            mode = mode.as_str(),
            "group inspected"
        );
        groups.push(GroupInspection {
            group_id: group_id.clone(),
            tracked_users,
            inactive,
            delivery,
        });
    }

    if cancelled {
        warn!("inspection cancelled; remaining groups were not dispatched");
    }
    let report = InspectionReport {
        now_unix,
        mode,
        groups,
    };
    info!(
        groups = report.groups.len(),
        inactive = report.inactive_total(),
        delivered = report.delivered_groups(),
        failed = report.failed_groups(),
        mode = mode.as_str(),
        "inspection finished"
    );
    report
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRow {
    pub user_id: String,
    pub display_name: String,
    pub days_silent: u64,
    pub last_seen: u64,
    pub last_seen_display: String,
    pub inactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Manual per-group view. `NoData` is distinct from "nobody inactive".
pub enum GroupOverview {
    NoData,
    Entries(Vec<OverviewRow>),
}

pub fn group_overview(
    store: &WatermarkStore,
    settings: &ResolvedSettings,
    group_id: &str,
    now_unix: u64,
) -> GroupOverview {
    let bucket = store.iterate_group(group_id);
    if bucket.is_empty() {
        return GroupOverview::NoData;
    }
    let rows = bucket
        .into_iter()
        .filter(|(user_id, _)| settings.policy.is_user_tracked(group_id, user_id))
        .map(|(user_id, last_seen)| {
            let age = elapsed_seconds(last_seen, now_unix);
            OverviewRow {
                display_name: settings.policy.display_name(&user_id),
                user_id,
                days_silent: whole_days(age),
                last_seen,
                last_seen_display: settings.digest.timezone.format_unix_seconds(last_seen),
                inactive: is_inactive(age, &settings.digest),
            }
        })
        .collect();
    GroupOverview::Entries(rows)
}

/// Renders an overview as operator-facing text.
pub fn render_group_overview(group_id: &str, overview: &GroupOverview) -> String {
    let rows = match overview {
        GroupOverview::NoData => return format!("No activity data recorded for group {group_id}."),
        GroupOverview::Entries(rows) => rows,
    };
    let mut lines = vec![format!("Activity overview for group {group_id}:")];
    for row in rows {
        let marker = if row.inactive { "🔴" } else { "🟢" };
        lines.push(format!(
            "{marker} {} ({}): {} day(s) silent, last seen {}",
            row.display_name, row.user_id, row.days_silent, row.last_seen_display
        ));
    }
    let inactive = rows.iter().filter(|row| row.inactive).count();
    lines.push(format!(
        "{} tracked member(s), {inactive} inactive.",
        rows.len()
    ));
    lines.join("\n")
}

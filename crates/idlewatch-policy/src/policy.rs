use std::collections::{BTreeSet, HashMap, HashSet};

use crate::alias_entries::{parse_alias_table, parse_id_set};
use crate::config::MonitorConfig;
use crate::diagnostics::ConfigDiagnostic;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Which groups are tracked and which of their members count.
///
/// Built whole from configuration and never mutated afterwards; callers swap
/// in a fresh instance instead.
pub struct MonitoringPolicy {
    monitored_groups: HashSet<String>,
    whitelist_enabled: bool,
    exception_groups: HashSet<String>,
    aliases: HashMap<String, String>,
    alias_resolution_enabled: bool,
}

impl MonitoringPolicy {
    pub fn builder() -> MonitoringPolicyBuilder {
        MonitoringPolicyBuilder::default()
    }

    /// Rebuilds the policy from raw configuration, skipping malformed entries.
    pub fn rebuild(config: &MonitorConfig) -> (Self, Vec<ConfigDiagnostic>) {
        let mut diagnostics = Vec::new();
        let monitored_groups =
            parse_id_set("monitored_groups", &config.monitored_groups, &mut diagnostics);
        let exception_groups = parse_id_set(
            "whitelist_exception_groups",
            &config.whitelist_exception_groups,
            &mut diagnostics,
        );
        let aliases =
            parse_alias_table("nickname_mapping", &config.nickname_mapping, &mut diagnostics);
        let policy = Self {
            monitored_groups: monitored_groups.into_iter().collect(),
            whitelist_enabled: config.enable_whitelist,
            exception_groups: exception_groups.into_iter().collect(),
            aliases: aliases.into_iter().collect(),
            alias_resolution_enabled: config.enable_nickname_mapping,
        };
        (policy, diagnostics)
    }

    pub fn is_group_monitored(&self, group_id: &str) -> bool {
        self.monitored_groups.contains(group_id)
    }

    /// Whitelist mode for a group: the global flag, inverted for exception groups.
    pub fn effective_whitelist_mode(&self, group_id: &str) -> bool {
        self.whitelist_enabled ^ self.exception_groups.contains(group_id)
    }

    pub fn has_alias(&self, user_id: &str) -> bool {
        self.aliases.contains_key(user_id)
    }

    /// True when the user counts in this group under its effective mode.
    pub fn is_user_tracked(&self, group_id: &str, user_id: &str) -> bool {
        !self.effective_whitelist_mode(group_id) || self.has_alias(user_id)
    }

    pub fn display_name(&self, user_id: &str) -> String {
        if self.alias_resolution_enabled {
            if let Some(alias) = self.aliases.get(user_id) {
                return alias.clone();
            }
        }
        format!("User {user_id}")
    }

    /// Monitored group ids in sorted order.
    pub fn monitored_groups(&self) -> Vec<String> {
        let sorted: BTreeSet<&String> = self.monitored_groups.iter().collect();
        sorted.into_iter().cloned().collect()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.whitelist_enabled
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitoringPolicyBuilder {
    policy: MonitoringPolicy,
}

impl MonitoringPolicyBuilder {
    pub fn monitor_group(mut self, group_id: impl Into<String>) -> Self {
        self.policy.monitored_groups.insert(group_id.into());
        self
    }

    pub fn whitelist(mut self, enabled: bool) -> Self {
        self.policy.whitelist_enabled = enabled;
        self
    }

    pub fn exception_group(mut self, group_id: impl Into<String>) -> Self {
        self.policy.exception_groups.insert(group_id.into());
        self
    }

    pub fn alias(mut self, user_id: impl Into<String>, alias: impl Into<String>) -> Self {
        self.policy.aliases.insert(user_id.into(), alias.into());
        self
    }

    pub fn alias_resolution(mut self, enabled: bool) -> Self {
        self.policy.alias_resolution_enabled = enabled;
        self
    }

    pub fn build(self) -> MonitoringPolicy {
        self.policy
    }
}

//! Hot path for inbound group messages.
//!
//! Every call is a policy lookup plus one map update. No I/O, no flush, no
//! `.await`: persistence picks the change up through the dirty generation.

use std::sync::Arc;

use idlewatch_policy::{MonitoringPolicy, SettingsHandle};
use serde::{Deserialize, Deserializer};

use crate::clock::Clock;
use crate::watermark_store::WatermarkStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl RawId {
    fn into_id(self) -> String {
        match self {
            Self::Text(value) => value.trim().to_string(),
            Self::Signed(value) => value.to_string(),
            Self::Unsigned(value) => value.to_string(),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_id)
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?
        .map(RawId::into_id)
        .filter(|id| !id.is_empty()))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
/// One inbound message. Ids may arrive as JSON strings or numbers.
pub struct InboundGroupMessage {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub group_id: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub sender_id: String,
}

impl InboundGroupMessage {
    pub fn new(group_id: Option<&str>, sender_id: &str) -> Self {
        Self {
            group_id: group_id.map(str::to_string),
            sender_id: sender_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    NoGroup,
    GroupNotMonitored,
    NotWhitelisted,
    Recorded,
}

impl IngestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoGroup => "no_group",
            Self::GroupNotMonitored => "group_not_monitored",
            Self::NotWhitelisted => "not_whitelisted",
            Self::Recorded => "recorded",
        }
    }
}

/// Applies the monitoring policy to one message and records it when it counts.
pub fn ingest_group_message(
    policy: &MonitoringPolicy,
    store: &WatermarkStore,
    message: &InboundGroupMessage,
    now_unix: u64,
) -> IngestOutcome {
    let Some(group_id) = message.group_id.as_deref() else {
        return IngestOutcome::NoGroup;
    };
    if !policy.is_group_monitored(group_id) {
        return IngestOutcome::GroupNotMonitored;
    }
    if !policy.is_user_tracked(group_id, &message.sender_id) {
        return IngestOutcome::NotWhitelisted;
    }
    store.record_seen(group_id, &message.sender_id, now_unix);
    IngestOutcome::Recorded
}

#[derive(Debug, Clone)]
/// Cloneable ingestion entry point for adapters running on any thread.
pub struct IngestionPath {
    store: WatermarkStore,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
}

impl IngestionPath {
    pub fn new(store: WatermarkStore, settings: SettingsHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    pub fn handle(&self, message: &InboundGroupMessage) -> IngestOutcome {
        let settings = self.settings.load();
        ingest_group_message(
            &settings.policy,
            &self.store,
            message,
            self.clock.now_unix(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use idlewatch_policy::{MonitoringPolicy, ResolvedSettings, SettingsHandle};

    use super::{ingest_group_message, InboundGroupMessage, IngestOutcome, IngestionPath};
    use crate::clock::ManualClock;
    use crate::watermark_store::WatermarkStore;

    fn whitelist_policy() -> MonitoringPolicy {
        MonitoringPolicy::builder()
            .monitor_group("100")
            .monitor_group("200")
            .whitelist(true)
            .exception_group("200")
            .alias("1", "Alice")
            .build()
    }

    #[test]
    fn unit_decisions_follow_group_and_whitelist_rules() {
        let policy = whitelist_policy();
        let store = WatermarkStore::new();
        let cases = [
            (None, "1", IngestOutcome::NoGroup),
            (Some("999"), "1", IngestOutcome::GroupNotMonitored),
            (Some("100"), "2", IngestOutcome::NotWhitelisted),
            (Some("100"), "1", IngestOutcome::Recorded),
            (Some("200"), "2", IngestOutcome::Recorded),
        ];
        for (group, sender, expected) in cases {
            let outcome =
                ingest_group_message(&policy, &store, &InboundGroupMessage::new(group, sender), 50);
            assert_eq!(outcome, expected, "group={group:?} sender={sender}");
        }
        assert_eq!(store.last_seen("100", "1"), Some(50));
        assert_eq!(store.last_seen("100", "2"), None);
        assert_eq!(store.last_seen("200", "2"), Some(50));
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn functional_inbound_message_accepts_numeric_and_missing_ids() {
        let numeric: InboundGroupMessage =
            serde_json::from_str(r#"{"group_id": 100, "sender_id": 42}"#).expect("numeric");
        assert_eq!(numeric, InboundGroupMessage::new(Some("100"), "42"));

        let private: InboundGroupMessage =
            serde_json::from_str(r#"{"sender_id": " 7 "}"#).expect("no group");
        assert_eq!(private.group_id, None);
        assert_eq!(private.sender_id, "7");

        let blank: InboundGroupMessage =
            serde_json::from_str(r#"{"group_id": "", "sender_id": "7"}"#).expect("blank group");
        assert_eq!(blank.group_id, None);

        let null_group: InboundGroupMessage =
            serde_json::from_str(r#"{"group_id": null, "sender_id": "7"}"#).expect("null group");
        assert_eq!(null_group.group_id, None);
    }

    #[test]
    fn functional_ingestion_path_uses_current_settings_and_clock() {
        let store = WatermarkStore::new();
        let settings = SettingsHandle::new(ResolvedSettings::default());
        let clock = Arc::new(ManualClock::new(1_000));
        let path = IngestionPath::new(store.clone(), settings.clone(), clock.clone());
        let message = InboundGroupMessage::new(Some("100"), "1");

        assert_eq!(path.handle(&message), IngestOutcome::GroupNotMonitored);
        settings.replace(ResolvedSettings {
            policy: whitelist_policy(),
            ..ResolvedSettings::default()
        });
        clock.advance(5);
        assert_eq!(path.handle(&message), IngestOutcome::Recorded);
        assert_eq!(store.last_seen("100", "1"), Some(1_005));
    }
}

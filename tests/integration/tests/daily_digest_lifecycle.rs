use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use idlewatch_policy::FileConfigSource;
use idlewatch_runtime::{
    load_state, DeliveryOutcome, DigestSender, DispatchError, IdleWatchService,
    InboundGroupMessage, IngestOutcome, ManualClock, ScheduleState, ShutdownSignal,
};

const MARCH_FIRST_UTC: u64 = 1_709_251_200;
const DAY: u64 = 86_400;

#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DigestSender for CapturingSender {
    async fn send_message(&self, group_id: &str, text: &str) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .map_err(|_| DispatchError::Rejected("capture lock poisoned".to_string()))?
            .push((group_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn write_config(path: &std::path::Path, body: &str) {
    std::fs::write(path, body).expect("write config");
}

#[tokio::test]
async fn integration_config_file_drives_ingestion_digest_and_restart() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let config_path = tempdir.path().join("monitor.toml");
    let state_path = tempdir.path().join("state").join("state.json");
    write_config(
        &config_path,
        r#"
monitored_groups = ["100", 200]
enable_whitelist = true
whitelist_exception_groups = [200]
nickname_mapping = ["1:Alice", "2：Bob", "broken-entry"]
push_time = "09：30"
timezone = "UTC"
alert_template = "{nickname} silent {days}d"
digest_header = "Quiet members:"
retry_backoff_secs = 0.0
inter_group_delay_secs = 0.0
"#,
    );

    let clock = Arc::new(ManualClock::new(MARCH_FIRST_UTC - 3 * DAY));
    let sender = Arc::new(CapturingSender::default());
    let service = IdleWatchService::with_clock(
        &state_path,
        Arc::new(FileConfigSource::new(&config_path)),
        sender.clone(),
        clock.clone(),
    );

    let events = [
        (r#"{"group_id": 100, "sender_id": 1}"#, IngestOutcome::Recorded),
        (r#"{"group_id": "100", "sender_id": "3"}"#, IngestOutcome::NotWhitelisted),
        (r#"{"group_id": "200", "sender_id": "3"}"#, IngestOutcome::Recorded),
        (r#"{"group_id": "300", "sender_id": "1"}"#, IngestOutcome::GroupNotMonitored),
        (r#"{"sender_id": "1"}"#, IngestOutcome::NoGroup),
    ];
    for (raw, expected) in events {
        let message: InboundGroupMessage = serde_json::from_str(raw).expect("event json");
        assert_eq!(service.ingest(&message), expected, "event {raw}");
    }

    clock.set(MARCH_FIRST_UTC + 9 * 3_600 + 30 * 60);
    let tick = service
        .run_maintenance_tick(&ShutdownSignal::never())
        .await
        .expect("tick");
    assert_eq!(tick.schedule, Some(ScheduleState::DueFirst));
    let inspection = tick.inspection.expect("digest inspection");
    assert_eq!(inspection.groups.len(), 2);
    assert!(inspection
        .groups
        .iter()
        .all(|group| matches!(group.delivery, DeliveryOutcome::Delivered { attempts: 1 })));

    let sent = sender.sent.lock().expect("sent").clone();
    assert_eq!(
        sent,
        vec![
            ("100".to_string(), "Quiet members:\nAlice silent 3d".to_string()),
            ("200".to_string(), "Quiet members:\nUser 3 silent 3d".to_string()),
        ]
    );

    assert!(service.shutdown().await.is_written());
    let persisted = load_state(&state_path).snapshot;
    assert_eq!(persisted.global_last_run_date, "2024-03-01");
    assert_eq!(persisted.entry_count(), 2);

    let restarted = IdleWatchService::with_clock(
        &state_path,
        Arc::new(FileConfigSource::new(&config_path)),
        sender.clone(),
        clock.clone(),
    );
    clock.advance(60);
    let after_restart = restarted
        .run_maintenance_tick(&ShutdownSignal::never())
        .await
        .expect("tick after restart");
    assert_eq!(after_restart.schedule, Some(ScheduleState::AlreadyRan));
    assert_eq!(sender.sent.lock().expect("sent").len(), 2);
}

#[tokio::test]
async fn integration_config_edits_apply_on_next_tick_and_broken_edits_are_ignored() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let config_path = tempdir.path().join("monitor.json");
    write_config(
        &config_path,
        r#"{"monitored_groups": ["100"], "enable_whitelist": false, "timezone": "UTC"}"#,
    );
    let clock = Arc::new(ManualClock::new(MARCH_FIRST_UTC + 3_600));
    let service = IdleWatchService::with_clock(
        tempdir.path().join("state.json"),
        Arc::new(FileConfigSource::new(&config_path)),
        Arc::new(CapturingSender::default()),
        clock.clone(),
    );
    let message = InboundGroupMessage::new(Some("200"), "5");
    assert_eq!(service.ingest(&message), IngestOutcome::GroupNotMonitored);

    write_config(
        &config_path,
        r#"{"monitored_groups": {"100": true, "200": {}}, "enable_whitelist": false, "timezone": "UTC"}"#,
    );
    service
        .run_maintenance_tick(&ShutdownSignal::never())
        .await
        .expect("tick");
    assert_eq!(service.ingest(&message), IngestOutcome::Recorded);

    write_config(&config_path, "{ definitely not json");
    clock.advance(60);
    service
        .run_maintenance_tick(&ShutdownSignal::never())
        .await
        .expect("tick with broken config");
    assert_eq!(service.ingest(&message), IngestOutcome::Recorded);
}

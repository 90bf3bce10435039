//! Owned service state plus the maintenance loop that drives scheduling,
//! retention and periodic persistence.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use idlewatch_core::elapsed_seconds;
use idlewatch_policy::{log_config_diagnostics, ConfigSource, ResolvedSettings, SettingsHandle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::dispatch::DigestSender;
use crate::ingestion::{ingest_group_message, InboundGroupMessage, IngestOutcome, IngestionPath};
use crate::inspection::{self, GroupOverview, InspectionMode, InspectionReport};
use crate::persistence::{LoadSource, SaveOutcome, StatePersister};
use crate::retention::{sweep_stale_watermarks, RetentionReport};
use crate::scheduler::{plan_action, DigestScheduler, ScheduleState, ScheduledAction};
use crate::shutdown::ShutdownSignal;
use crate::watermark_store::{WatermarkSnapshot, WatermarkStore};

#[derive(Debug, Default)]
struct MaintenanceState {
    scheduler: DigestScheduler,
    last_sweep_unix: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What one maintenance tick did.
pub struct TickReport {
    pub schedule: Option<ScheduleState>,
    pub action: Option<ScheduledAction>,
    pub marker_flush: Option<SaveOutcome>,
    pub inspection: Option<InspectionReport>,
    pub retention: Option<RetentionReport>,
    pub background_flush_started: bool,
}

fn persist_snapshot(
    store: &WatermarkStore,
    persister: &StatePersister,
    snapshot: &WatermarkSnapshot,
) -> SaveOutcome {
    let outcome = persister.save(snapshot);
    if let SaveOutcome::Written { generation } = outcome {
        store.mark_flushed(generation);
    }
    outcome
}

/// Inactivity monitor state owned by one process.
///
/// Construct with [`IdleWatchService::open`], feed messages through
/// [`IdleWatchService::ingest`] (or a cloned [`IngestionPath`]), and either
/// drive ticks manually or call [`IdleWatchService::start`] for the
/// background loop.
pub struct IdleWatchService {
    store: WatermarkStore,
    settings: SettingsHandle,
    config_source: Arc<dyn ConfigSource>,
    persister: Arc<StatePersister>,
    sender: Arc<dyn DigestSender>,
    clock: Arc<dyn Clock>,
    load_source: LoadSource,
    maintenance: tokio::sync::Mutex<MaintenanceState>,
    background_flush: Mutex<Option<JoinHandle<SaveOutcome>>>,
}

impl IdleWatchService {
    /// Loads persisted state (or empty defaults) and the current configuration.
    pub fn open(
        state_path: impl Into<PathBuf>,
        config_source: Arc<dyn ConfigSource>,
        sender: Arc<dyn DigestSender>,
    ) -> Self {
        Self::with_clock(state_path, config_source, sender, Arc::new(SystemClock))
    }

    pub fn with_clock(
        state_path: impl Into<PathBuf>,
        config_source: Arc<dyn ConfigSource>,
        sender: Arc<dyn DigestSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let persister = Arc::new(StatePersister::new(state_path));
        let loaded = persister.load();
        let store = WatermarkStore::from_snapshot(loaded.snapshot);
        if loaded.source == LoadSource::Legacy {
            // Legacy files carry no marker; clearing it schedules a rewrite.
            store.clear_last_run_date();
        }
        let service = Self {
            store,
            settings: SettingsHandle::new(ResolvedSettings::default()),
            config_source,
            persister,
            sender,
            clock,
            load_source: loaded.source,
            maintenance: tokio::sync::Mutex::new(MaintenanceState::default()),
            background_flush: Mutex::new(None),
        };
        service.refresh_settings(true);
        service
    }

    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    pub fn settings(&self) -> Arc<ResolvedSettings> {
        self.settings.load()
    }

    pub fn load_source(&self) -> &LoadSource {
        &self.load_source
    }

    pub fn state_path(&self) -> &std::path::Path {
        self.persister.path()
    }

    /// Re-reads configuration. Returns `true` when the active settings changed.
    pub fn reload_settings(&self) -> bool {
        self.refresh_settings(false)
    }

    fn refresh_settings(&self, initial: bool) -> bool {
        let config = match self.config_source.load() {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    source = %self.config_source.describe(),
                    %error,
                    "config reload failed; keeping previous settings"
                );
                return false;
            }
        };
        let (resolved, diagnostics) = ResolvedSettings::resolve(&config);
        let changed = *self.settings.load() != resolved;
        if !changed && !initial {
            return false;
        }
        log_config_diagnostics(&diagnostics);
        info!(
            source = %self.config_source.describe(),
            monitored_groups = resolved.policy.monitored_groups().len(),
            aliases = resolved.policy.alias_count(),
            whitelist = resolved.policy.whitelist_enabled(),
            push_time = %resolved.digest.push_time,
            timezone = %resolved.digest.timezone.name(),
            "monitoring settings applied"
        );
        self.settings.replace(resolved);
        changed
    }

    pub fn ingest(&self, message: &InboundGroupMessage) -> IngestOutcome {
        let settings = self.settings.load();
        ingest_group_message(
            &settings.policy,
            &self.store,
            message,
            self.clock.now_unix(),
        )
    }

    /// Detached ingestion handle for adapters running on other tasks or threads.
    pub fn ingestion(&self) -> IngestionPath {
        IngestionPath::new(
            self.store.clone(),
            self.settings.clone(),
            Arc::clone(&self.clock),
        )
    }

    pub async fn run_inspection(
        &self,
        mode: InspectionMode,
        shutdown: &ShutdownSignal,
    ) -> InspectionReport {
        let settings = self.settings.load();
        inspection::run_inspection(
            &self.store,
            &settings,
            self.sender.as_ref(),
            self.clock.now_unix(),
            mode,
            shutdown,
        )
        .await
    }

    pub fn group_overview(&self, group_id: &str) -> GroupOverview {
        let settings = self.settings.load();
        inspection::group_overview(&self.store, &settings, group_id, self.clock.now_unix())
    }

    /// Clears the daily marker, keeping every watermark, and persists the change.
    pub async fn reset_daily_marker(&self) -> SaveOutcome {
        let previous = self.store.last_run_date();
        self.store.clear_last_run_date();
        info!(previous = %previous, "daily marker cleared");
        self.flush_sync().await
    }

    /// Writes the current snapshot on the calling thread.
    pub fn flush_now(&self) -> SaveOutcome {
        persist_snapshot(&self.store, &self.persister, &self.store.snapshot())
    }

    /// Writes the current snapshot on the blocking pool and waits for it.
    pub async fn flush_sync(&self) -> SaveOutcome {
        let snapshot = self.store.snapshot();
        let generation = snapshot.generation;
        let store = self.store.clone();
        let persister = Arc::clone(&self.persister);
        match tokio::task::spawn_blocking(move || persist_snapshot(&store, &persister, &snapshot))
            .await
        {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(error = %join_error, "state flush task failed");
                SaveOutcome::Failed {
                    generation,
                    error: join_error.to_string(),
                }
            }
        }
    }

    fn background_slot(&self) -> MutexGuard<'_, Option<JoinHandle<SaveOutcome>>> {
        self.background_flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a flush on the blocking pool unless one is still running.
    pub fn spawn_background_flush(&self) -> bool {
        let mut slot = self.background_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("background flush still running; skipping");
            return false;
        }
        let snapshot = self.store.snapshot();
        let store = self.store.clone();
        let persister = Arc::clone(&self.persister);
        *slot = Some(tokio::task::spawn_blocking(move || {
            persist_snapshot(&store, &persister, &snapshot)
        }));
        true
    }

    async fn await_background_flush(&self) {
        let pending = self.background_slot().take();
        if let Some(handle) = pending {
            match handle.await {
                Ok(outcome) => debug!(outcome = ?outcome, "background flush joined"),
                Err(join_error) => warn!(error = %join_error, "background flush task failed"),
            }
        }
    }

    /// One pass of the maintenance loop: settings reload, digest scheduling,
    /// retention and the periodic flush check.
    pub async fn run_maintenance_tick(&self, shutdown: &ShutdownSignal) -> Result<TickReport> {
        let mut maintenance = self.maintenance.lock().await;
        self.reload_settings();
        let settings = self.settings.load();
        let digest = &settings.digest;
        let now_unix = self.clock.now_unix();
        let Some(now_local) = digest.timezone.local_datetime(now_unix) else {
            bail!("current time {now_unix} is outside the supported calendar range");
        };
        let mut report = TickReport::default();

        let last_run_date = self.store.last_run_date();
        if let Some(evaluation) = maintenance.scheduler.evaluate(
            now_local,
            digest.push_time,
            digest.catch_up_minutes(),
            &last_run_date,
        ) {
            let action = plan_action(
                &evaluation,
                digest.missed_window_policy,
                digest.silent_recheck,
            );
            report.schedule = Some(evaluation.state);
            report.action = Some(action);

            if action.commits_marker() {
                if evaluation.state == ScheduleState::DueLate {
                    warn!(
                        today = %evaluation.today,
                        push_time = %digest.push_time,
                        catch_up_minutes = digest.catch_up_minutes(),
                        policy = digest.missed_window_policy.as_str(),
                        "digest window missed"
                    );
                }
                self.store.set_last_run_date(&evaluation.today);
                let outcome = self.flush_sync().await;
                if !outcome.is_written() {
                    warn!(today = %evaluation.today, "day marker not persisted; keeping in-memory marker");
                }
                info!(today = %evaluation.today, action = action.as_str(), "day marker committed");
                report.marker_flush = Some(outcome);
            }

            let mode = match action {
                ScheduledAction::SendDigest | ScheduledAction::SendLateDigest => {
                    Some(InspectionMode::Dispatch)
                }
                ScheduledAction::SilentRecheck => Some(InspectionMode::Silent),
                ScheduledAction::None | ScheduledAction::MarkMissed => None,
            };
            if let Some(mode) = mode {
                report.inspection = Some(
                    inspection::run_inspection(
                        &self.store,
                        &settings,
                        self.sender.as_ref(),
                        now_unix,
                        mode,
                        shutdown,
                    )
                    .await,
                );
            }
        }

        let sweep_due = maintenance.last_sweep_unix.map_or(true, |last_sweep| {
            elapsed_seconds(last_sweep, now_unix) >= digest.cleanup_interval.as_secs()
        });
        if sweep_due && !shutdown.is_cancelled() {
            report.retention = Some(
                sweep_stale_watermarks(&self.store, now_unix, digest.cleanup_horizon_seconds())
                    .await,
            );
            maintenance.last_sweep_unix = Some(now_unix);
        }

        if self.store.is_dirty()
            && self.persister.elapsed_since_last_success() >= digest.flush_interval
        {
            report.background_flush_started = self.spawn_background_flush();
        }
        Ok(report)
    }

    /// Starts the maintenance loop on the current Tokio runtime.
    pub fn start(self: Arc<Self>) -> Result<ServiceHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("idlewatch service requires an active Tokio runtime")?;
        let tick_interval = self.settings.load().digest.tick_interval;
        if tick_interval.is_zero() {
            bail!("maintenance tick interval must be greater than zero");
        }
        let (shutdown_tx, shutdown) = ShutdownSignal::channel();
        let service = Arc::clone(&self);
        let task = runtime.spawn(async move {
            run_maintenance_loop(service, tick_interval, shutdown).await;
        });
        info!(
            state_path = %self.persister.path().display(),
            tick_secs = tick_interval.as_secs(),
            "idlewatch maintenance loop started"
        );
        Ok(ServiceHandle {
            service: self,
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Joins any in-flight background write, then flushes once more.
    pub async fn shutdown(&self) -> SaveOutcome {
        self.await_background_flush().await;
        let outcome = self.flush_sync().await;
        info!(outcome = ?outcome, "idlewatch state flushed at shutdown");
        outcome
    }
}

async fn run_maintenance_loop(
    service: Arc<IdleWatchService>,
    tick_interval: Duration,
    shutdown: ShutdownSignal,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tick_count = 0_u64;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                tick_count = tick_count.saturating_add(1);
                let tick_service = Arc::clone(&service);
                let tick_shutdown = shutdown.clone();
                let tick = tokio::spawn(async move {
                    tick_service.run_maintenance_tick(&tick_shutdown).await
                });
                match tick.await {
                    Ok(Ok(report)) => debug!(
                        tick_count,
                        schedule = report.schedule.map(ScheduleState::as_str),
                        action = report.action.map(ScheduledAction::as_str),
                        "maintenance tick finished"
                    ),
                    Ok(Err(error)) => error!(tick_count, error = %format!("{error:#}"), "maintenance tick failed"),
                    Err(join_error) => error!(tick_count, error = %join_error, "maintenance tick aborted"),
                }
            }
        }
    }
    info!(tick_count, "idlewatch maintenance loop stopped");
}

/// Handle to a running maintenance loop.
pub struct ServiceHandle {
    service: Arc<IdleWatchService>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn service(&self) -> &Arc<IdleWatchService> {
        &self.service
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels the loop, waits for it to stop, then performs the final flush.
    pub async fn shutdown(mut self) -> SaveOutcome {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(join_error) = task.await {
                warn!(error = %join_error, "maintenance loop ended abnormally");
            }
        }
        self.service.shutdown().await
    }
}

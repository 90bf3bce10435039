use std::sync::Arc;

use anyhow::{bail, Context, Result};
use idlewatch_policy::{ConfigSource, FileConfigSource, StaticConfigSource};
use idlewatch_runtime::{
    render_group_overview, DeliveryOutcome, IdleWatchService, InboundGroupMessage, IngestOutcome,
    IngestionPath, InspectionMode, InspectionReport, SaveOutcome, ShutdownSignal,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::cli_args::{Cli, Command};
use crate::ndjson_sender::NdjsonSender;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EventPumpSummary {
    pub(crate) lines: usize,
    pub(crate) recorded: usize,
    pub(crate) ignored: usize,
    pub(crate) malformed: usize,
}

fn config_source(cli: &Cli) -> Arc<dyn ConfigSource> {
    match &cli.config {
        Some(path) => Arc::new(FileConfigSource::new(path)),
        None => {
            warn!("no --config given; nothing is monitored until a config file is supplied");
            Arc::new(StaticConfigSource::default())
        }
    }
}

pub(crate) async fn execute(cli: Cli) -> Result<()> {
    let service = Arc::new(IdleWatchService::open(
        &cli.state,
        config_source(&cli),
        Arc::new(NdjsonSender::new(tokio::io::stdout())),
    ));
    match cli.command {
        Command::Run => run_watch(service).await,
        Command::Inspect { dispatch } => {
            let mode = if dispatch {
                InspectionMode::Dispatch
            } else {
                InspectionMode::Silent
            };
            let report = service
                .run_inspection(mode, &ShutdownSignal::never())
                .await;
            println!("{}", render_inspection_report(&report));
            finish(&service).await
        }
        Command::Overview { group } => {
            let overview = service.group_overview(&group);
            println!("{}", render_group_overview(&group, &overview));
            Ok(())
        }
        Command::ResetMarker => match service.reset_daily_marker().await {
            SaveOutcome::Failed { error, .. } => {
                bail!("failed to persist cleared marker: {error}")
            }
            _ => {
                println!(
                    "daily marker cleared: state={}",
                    service.state_path().display()
                );
                Ok(())
            }
        },
    }
}

async fn finish(service: &IdleWatchService) -> Result<()> {
    match service.shutdown().await {
        SaveOutcome::Failed { error, .. } => bail!("final state flush failed: {error}"),
        _ => Ok(()),
    }
}

async fn run_watch(service: Arc<IdleWatchService>) -> Result<()> {
    let handle = Arc::clone(&service)
        .start()
        .context("failed to start maintenance loop")?;
    let ingestion = service.ingestion();
    let mut summary = EventPumpSummary::default();
    let reader = tokio::io::BufReader::new(tokio::io::stdin());

    let pumped = tokio::select! {
        result = pump_events(reader, &ingestion, &mut summary) => result,
        signal = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            signal.context("failed to listen for ctrl-c")
        }
    };
    info!(
        lines = summary.lines,
        recorded = summary.recorded,
        ignored = summary.ignored,
        malformed = summary.malformed,
        "event stream closed"
    );

    let outcome = handle.shutdown().await;
    pumped?;
    match outcome {
        SaveOutcome::Failed { error, .. } => bail!("final state flush failed: {error}"),
        _ => Ok(()),
    }
}

/// Feeds NDJSON events into ingestion until EOF. Malformed lines are logged
/// and skipped.
pub(crate) async fn pump_events<R>(
    reader: R,
    ingestion: &IngestionPath,
    summary: &mut EventPumpSummary,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed to read event stream")?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        summary.lines = summary.lines.saturating_add(1);
        let message = match serde_json::from_str::<InboundGroupMessage>(trimmed) {
            Ok(message) => message,
            Err(error) => {
                warn!(line = summary.lines, %error, "skipping malformed event");
                summary.malformed = summary.malformed.saturating_add(1);
                continue;
            }
        };
        let outcome = ingestion.handle(&message);
        debug!(
            group_id = message.group_id.as_deref().unwrap_or(""),
            sender_id = %message.sender_id,
            outcome = outcome.as_str(),
            "event ingested"
        );
        match outcome {
            IngestOutcome::Recorded => summary.recorded = summary.recorded.saturating_add(1),
            _ => summary.ignored = summary.ignored.saturating_add(1),
        }
    }
    Ok(())
}

pub(crate) fn render_inspection_report(report: &InspectionReport) -> String {
    let mut lines = vec![format!(
        "inspection mode={} groups={} inactive={} delivered={} failed={}",
        report.mode.as_str(),
        report.groups.len(),
        report.inactive_total(),
        report.delivered_groups(),
        report.failed_groups()
    )];
    for group in &report.groups {
        let delivery = match &group.delivery {
            DeliveryOutcome::Delivered { attempts } => format!("delivered attempts={attempts}"),
            DeliveryOutcome::Failed { attempts, error } => {
                format!("failed attempts={attempts} error={error}")
            }
            other => other.as_str().to_string(),
        };
        lines.push(format!(
            "group={} tracked={} inactive={} {delivery}",
            group.group_id,
            group.tracked_users,
            group.inactive.len()
        ));
        for member in &group.inactive {
            lines.push(format!("  {}", member.line));
        }
    }
    lines.join("\n")
}

//! Runtime for idlewatch: the watermark table, its durable snapshot, the
//! ingestion hot path, the once-per-day digest scheduler, inspection and
//! dispatch, and retention.
//!
//! [`IdleWatchService`] ties the pieces together and owns the maintenance
//! loop. Everything below it is usable on its own and is tested in isolation.

pub mod clock;
pub mod dispatch;
pub mod ingestion;
pub mod inspection;
pub mod persistence;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod watermark_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{send_with_retry, DeliveryOutcome, DigestSender, DispatchError, RetryPolicy};
pub use ingestion::{ingest_group_message, InboundGroupMessage, IngestOutcome, IngestionPath};
pub use inspection::{
    classify_group, group_overview, render_alert_line, render_digest_message,
    render_group_overview, run_inspection, GroupInspection, GroupOverview, InactiveMember,
    InspectionMode, InspectionReport, OverviewRow,
};
pub use persistence::{
    load_state, parse_state_document, render_state_document, LoadSource, LoadedState,
    SaveOutcome, StatePersister,
};
pub use retention::{retention_cutoff, sweep_stale_watermarks, RetentionReport};
pub use scheduler::{
    classify_schedule, plan_action, DigestScheduler, ScheduleEvaluation, ScheduleState,
    ScheduledAction, RUN_DATE_FORMAT,
};
pub use service::{IdleWatchService, ServiceHandle, TickReport};
pub use shutdown::ShutdownSignal;
pub use watermark_store::{WatermarkSnapshot, WatermarkStore};

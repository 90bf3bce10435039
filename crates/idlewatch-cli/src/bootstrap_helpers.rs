use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Installs the process-wide subscriber. Logs go to stderr so stdout stays
/// free for NDJSON output.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

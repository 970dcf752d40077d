use tracing::subscriber::DefaultGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logs for the current test thread, filtered by `RUST_LOG`.
pub fn trace() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .with_test_writer()
        .set_default()
}

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize tracing on stderr with env filter support.
///
/// Stdout stays free for command responses. Set `RUST_LOG=debug` for
/// verbose output, or e.g. `RUST_LOG=nightfall_engine::governor=debug` for
/// one subsystem.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing already initialized");
    }
}

pub fn log_startup() {
    tracing::info!("nightfall {} starting up", env!("CARGO_PKG_VERSION"));
}

pub fn log_shutdown() {
    tracing::info!("nightfall shutting down");
}

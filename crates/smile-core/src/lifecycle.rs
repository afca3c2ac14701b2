use tracing_subscriber::EnvFilter;

/// Initialize tracing with env filter support.
///
/// Set `RUST_LOG=debug` for verbose output, defaults to `info`. Output goes to
/// stderr so the recognizer's stdout stays free.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

pub fn log_startup(component: &str) {
    tracing::info!(component, version = env!("CARGO_PKG_VERSION"), "Smile2Unlock starting up");
}

pub fn log_shutdown(component: &str) {
    tracing::info!(component, "Smile2Unlock shutting down");
}

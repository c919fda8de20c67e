/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG` (default `info`). Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .try_init();
}

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber. Dev chatter is only on by default in debug builds;
/// `RUST_LOG` overrides either way. Safe to call more than once.
pub fn init() {
    let default_level = if cfg!(debug_assertions) { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}

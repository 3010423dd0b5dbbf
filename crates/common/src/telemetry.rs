use tracing_subscriber::EnvFilter;

/// Initialise JSON tracing output for a service binary.
///
/// `RUST_LOG` wins when set; otherwise `default_directives` applies
/// (e.g. `"tracker_notifier=info,tracker_broker=info"`).
pub fn init_tracing(default_directives: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives)),
        )
        .json()
        .init();
}

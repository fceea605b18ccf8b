use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins when set; otherwise the
/// level is `debug` with the debug flag and `info` without.
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

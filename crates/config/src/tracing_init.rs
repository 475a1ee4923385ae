use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` wins when set and parsable; otherwise `level` (normally
/// `AppConfig::log_level`) is used, and `info` if that does not parse
/// either. Only the first call installs a subscriber.
pub fn init_tracing(level: &str) {
    let _ = fmt().with_env_filter(build_filter(level)).with_target(true).try_init();
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// configured filter. Returns `false` when a global subscriber was already
/// set, which leaves that subscriber in place.
pub fn init_tracing(config: &EngineConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

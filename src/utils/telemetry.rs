//! Logging setup
//!
//! Installs a `tracing` subscriber with an env-driven filter. Library code
//! only emits events; binaries and services decide whether to call this.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const DEFAULT_DIRECTIVE: &str = "tuning_config_recommender=info";

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_logging(DEFAULT_DIRECTIVE);
        assert!(!init_logging(DEFAULT_DIRECTIVE));
    }
}

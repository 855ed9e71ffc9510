//! Tracing setup for tradeflow binaries.
//!
//! [`init_tracing`] installs the global subscriber. Filtering comes from
//! `TRADEFLOW_LOG`, then `RUST_LOG`, then the supplied default level. Only the
//! first call in a process takes effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "TRADEFLOW_LOG";

/// Install the global subscriber. `json` selects newline-delimited JSON.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = filter_from_env(level);

    // Logs go to stderr so stdout stays clean for JSON run output.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

fn filter_from_env(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }
}

//! Process-wide log setup.
//!
//! The store logs through the `log` facade and the scan/work paths through
//! `tracing`; `LogTracer` forwards the former into the latter so one
//! subscriber sees both.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for unattended deployments.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level
/// (`info`, or `debug` when `verbose`).
///
/// Returns false when a subscriber was already installed; the call is then a
/// no-op.
pub fn init_logging(verbose: bool) -> bool {
    init_logging_with(verbose, LogFormat::Text)
}

pub fn init_logging_with(verbose: bool, format: LogFormat) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        LogFormat::Text => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(false).compact());
            tracing::subscriber::set_global_default(subscriber).is_ok()
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true));
            tracing::subscriber::set_global_default(subscriber).is_ok()
        }
    };

    if installed {
        // Fails only if another `log` logger is already set.
        let _ = tracing_log::LogTracer::init();
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _first = init_logging(false);
        assert!(!init_logging(true));
        assert!(!init_logging_with(false, LogFormat::Json));
    }
}

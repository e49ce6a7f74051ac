//! Logging for relay-dispatch
//!
//! The engine logs through `tracing`. Leak warnings additionally go through an
//! injectable [`Logger`] so hosts can route them elsewhere; the default
//! [`TracingLogger`] forwards them to `tracing::warn!`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tag used for engine warnings
pub const TAG: &str = "relay-dispatch";

/// Injectable logger for engine warnings
#[cfg_attr(test, mockall::automock)]
pub trait Logger: Send + Sync {
    fn print(&self, tag: &str, message: &str);
}

/// Logger that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn print(&self, tag: &str, message: &str) {
        tracing::warn!(tag, "{}", message);
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns false when a
/// subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_logger_does_not_panic_without_subscriber() {
        TracingLogger.print(TAG, "no subscriber installed");
    }

    #[test]
    fn test_mock_logger_records_tag() {
        let mut logger = MockLogger::new();
        logger
            .expect_print()
            .withf(|tag, message| tag == TAG && message.contains("leak"))
            .times(1)
            .return_const(());
        logger.print(TAG, "possible leak");
    }
}

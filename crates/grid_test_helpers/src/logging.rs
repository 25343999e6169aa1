//! Test logging configuration utilities
//!
//! Configures tracing for tests to prevent output pollution and enable
//! debugging when needed.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Initialize tracing for tests.
///
/// The global subscriber can only be installed once per test process;
/// subsequent calls are ignored. Set `RUST_LOG` to override the default
/// `warn` filter when debugging a test.
///
/// # Example
///
/// ```rust
/// use grid_test_helpers::logging::init_test_logging;
///
/// fn my_test() {
///     init_test_logging();
///     // Test code runs with quiet logging unless RUST_LOG says otherwise
/// }
/// ```
pub fn init_test_logging() {
    init_test_logging_with("warn");
}

/// Initialize tracing for tests with a custom log level filter
pub fn init_test_logging_with(level: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

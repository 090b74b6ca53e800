//! Shared test utilities

use mux_core::{LogConfig, Payload};
use rand::Rng;

/// Initialize logging for tests and examples.
///
/// Safe to call multiple times; only the first call installs a subscriber.
/// The filter honors `RUST_LOG` and defaults to `info`.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Initialize logging from a [`LogConfig`], as an embedding host would.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::new(&config.level);
    if config.json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Generate a payload with `size` random bytes
pub fn generate_payload(size: usize) -> Payload {
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
    Payload::new(data)
}

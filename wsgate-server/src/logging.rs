//! Logging setup for the WebSocket server
//!
//! The server emits `tracing` events and spans unconditionally; installing a
//! subscriber is left to the application. With the `logging` feature,
//! [`init_logging`] installs a formatting subscriber filtered by `RUST_LOG`.

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Initialize logging subsystem
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging_with(&std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()))
}

/// Initialize logging with an explicit filter directive such as `wsgate_server=debug`
#[cfg(feature = "logging")]
pub fn init_logging_with(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(filter)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

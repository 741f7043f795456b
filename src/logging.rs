use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Only the first call installs anything.
///
/// # Errors
///
/// [`LoggingError::AlreadyInitialised`] on later calls, which callers may ignore, and
/// [`LoggingError::Subscriber`] if another global subscriber was installed elsewhere.
pub fn init_tracing(ansi: bool) -> Result<(), LoggingError> {
    INITIALISED
        .set(())
        .map_err(|_| LoggingError::AlreadyInitialised)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::Subscriber(e.to_string()))
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

//! Optional tracing setup for embedders.

use crate::error::{Result, RevlogError};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes tracing output for embedders that want engine diagnostics.
///
/// `level` accepts any `EnvFilter` directive, e.g. `"revlog=debug"`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| RevlogError::InvalidArgument(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| RevlogError::InvalidArgument("Logging already initialized".into()))
}

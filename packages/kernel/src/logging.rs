//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{KernelError, Result};

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` wins over `default_filter` when it is set and valid. Fails if
/// a global subscriber is already installed.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| {
            KernelError::Config(format!("invalid log filter {:?}: {}", default_filter, e))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| KernelError::Config(e.to_string()))
}

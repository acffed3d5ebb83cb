//! Logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the host. This is the one the demo binary and tests use.

use tracing_subscriber::{fmt, EnvFilter};

use murmur_core::{VoiceError, VoiceResult};

/// Environment variable holding the filter directives
pub const LOG_ENV: &str = "MURMUR_LOG";

/// Output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install a global fmt subscriber filtered by `MURMUR_LOG` (default `info`)
///
/// Fails if a global subscriber is already set.
pub fn init_logging(format: LogFormat) -> VoiceResult<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| VoiceError::InvalidConfig(format!("logging already initialized: {}", e)))
}

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

/// Convert a verbosity count to a tracing [`Level`].
fn verbosity_to_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Resolve the filter directives: `RUST_LOG` wins, then `VAULTKB_LOG`,
/// then the verbosity flag.
fn resolve_filter(verbosity: u8) -> EnvFilter {
    if let Ok(directives) = std::env::var("RUST_LOG") {
        return EnvFilter::new(directives);
    }
    if let Ok(directives) = std::env::var("VAULTKB_LOG") {
        return EnvFilter::new(directives);
    }
    EnvFilter::new(verbosity_to_level(verbosity).to_string())
}

/// Initialise the global tracing subscriber.
///
/// `verbosity` controls the default log level (0 = warn … 3+ = trace).
/// `RUST_LOG` or `VAULTKB_LOG`, when set, override the verbosity flag
/// entirely.
pub fn init(verbosity: u8) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(verbosity))
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

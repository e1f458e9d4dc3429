//! 日志初始化模块：基于 tracing 的结构化日志。
//!
//! Logging setup.
//!
//! `RUST_LOG` wins over the configured level. Worker processes tag lines with
//! `worker_id`: the binary's `worker` span covers startup and shutdown, each
//! HTTP request opens a `request` span carrying it, and scheduled upstream
//! calls run under the span of the request that submitted them.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`init_logging`] | Install the global `tracing` subscriber |
//! | [`build_filter`] | Resolve the `EnvFilter` from `RUST_LOG` or a fallback level |

use crate::{Error, ErrorContext, Result};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` if set and valid, otherwise `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| {
        Error::configuration_with_context(
            "invalid log level",
            ErrorContext::new()
                .with_field_path("logging.level")
                .with_details(e.to_string()),
        )
    })
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = build_filter(level)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_directives_parse() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("chat_gateway=debug,warn").is_ok());
    }

    #[test]
    fn init_twice_is_ok() {
        assert!(init_logging("warn").is_ok());
        assert!(init_logging("warn").is_ok());
    }
}

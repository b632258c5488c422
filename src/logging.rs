//! Structured logging setup using tracing.
//!
//! Auto-detects format: human-readable with ANSI colors when stdout is a terminal,
//! structured JSON when piped/redirected (e.g. to a log collector in production).
//! Unlike an MCP-stdio server, this process has no protocol stream on stdout to
//! protect, so logs go to stdout rather than stderr.

use std::io::IsTerminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize the global tracing subscriber.
///
/// Log level comes from `config.log_level`, with `RUST_LOG` taking precedence
/// when set (the standard filter-syntax override).
pub fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_is_terminal = std::io::stdout().is_terminal();

    if stdout_is_terminal {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_ansi(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout).json())
            .init();
    }
}

/// Structured logging setup using tracing
///
/// Writes to stderr ONLY: stdout carries the MCP JSON-RPC stream when serving
/// and the JSON result of one-shot CLI commands.

use std::io::IsTerminal;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use crate::config::Config;

/// Output format for the stderr layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Resolve the configured format. Unknown values behave like "auto".
    pub fn resolve(configured: &str, stderr_is_terminal: bool) -> Self {
        match configured {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ if stderr_is_terminal => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize tracing subscriber with stderr-only output
///
/// Log level from config.log_level (default: info)
/// RUST_LOG env var can override at runtime
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let format = LogFormat::resolve(&config.log_format, std::io::stderr().is_terminal());

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(std::io::stderr().is_terminal())
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                )
                .init();
        }
    }
}

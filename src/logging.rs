//! Log subscriber for the CLI and native embedders.
//!
//! Library code only emits `tracing` events; nothing is printed until an
//! embedder installs a subscriber, here or its own.

use tracing_subscriber::{fmt, EnvFilter};

/// Crate events at `info`, dependencies at `warn`, unless `RUST_LOG` says otherwise.
pub const DEFAULT_DIRECTIVES: &str = "warn,walletlink=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `WALLETLINK_LOG_JSON=1` (or `true`) selects JSON lines.
    pub fn from_env() -> Self {
        match std::env::var("WALLETLINK_LOG_JSON") {
            Ok(value) if value == "1" || value.eq_ignore_ascii_case("true") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the stderr subscriber. Safe to call twice; the second call is a no-op.
pub fn init_logging() {
    let builder = fmt::Subscriber::builder().with_env_filter(env_filter()).with_writer(std::io::stderr);
    let _ = match LogFormat::from_env() {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.compact().with_target(false).try_init(),
    };
}

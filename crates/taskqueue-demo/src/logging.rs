//! Tracing subscriber setup for the demo binary.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables daily-rolled file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: [`DEFAULT_FILTER`])

use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pool lifecycle and job outcomes at INFO for every taskqueue crate; the
/// per-attempt decisions stay at DEBUG.
pub const DEFAULT_FILTER: &str =
    "taskqueue_demo=info,taskqueue_jobs=info,taskqueue_core=info,taskqueue::events=info";

/// Output encoding selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Anything other than `json` falls back to text.
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global subscriber. The returned guard flushes the file
/// writer; hold it until the process exits.
pub fn init_tracing() -> Option<WorkerGuard> {
    let format = LogFormat::from_env();
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match log_file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let file_dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("taskqueue-demo.log");
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(file_dir, file_name));

            match format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init(),
                LogFormat::Text => {
                    let mut layer = tracing_subscriber::fmt::layer().with_writer(writer);
                    if let Some(ansi) = log_ansi {
                        layer = layer.with_ansi(ansi);
                    } else {
                        layer = layer.with_ansi(false); // no ANSI in files
                    }
                    registry.with(layer).init();
                }
            }
            Some(guard)
        }
        None => {
            match format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init(),
                LogFormat::Text => {
                    let mut layer = tracing_subscriber::fmt::layer();
                    if let Some(ansi) = log_ansi {
                        layer = layer.with_ansi(ansi);
                    }
                    registry.with(layer).init();
                }
            }
            None
        }
    };

    info!(
        format = ?format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    guard
}

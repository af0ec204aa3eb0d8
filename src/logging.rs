//! Log sink setup.
//!
//! The subscriber is installed once at process start; every component then
//! logs through the `tracing` macros.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// One of error, warn, info, debug, trace
    pub level: String,
    /// Append target; `None` logs to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            file: None,
        }
    }
}

/// Level names accepted by `--log-level`.
pub fn normalize_level(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => Some("error"),
        "warn" | "warning" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        _ => None,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Calling this twice is harmless; the second call is ignored.
pub fn init(settings: &LogSettings) {
    let level = normalize_level(&settings.level).unwrap_or(DEFAULT_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut file_error = None;
    let (writer, ansi) = match &settings.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                file_error = Some((path.clone(), e));
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(writer)
        .try_init()
        .is_ok();

    if let Some((path, e)) = file_error {
        tracing::error!(path = %path.display(), "Log to file failed: {}", e);
    }
    if !installed {
        tracing::trace!("Global subscriber already installed");
    }
}

//! Tracing initialization for the lab tool
//!
//! Console filtering follows `RUST_LOG` (falling back to the options' default
//! filter) and `RUST_LOG_FORMAT` selects `pretty`, `compact` or `json` output.
//! When a log directory is given, a second plaintext layer records every
//! `debug` and above event to `lab_setup_<timestamp>.log` regardless of the
//! console filter.

use std::path::{Path, PathBuf};

use chrono::Local;
use lab_core::{LabError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,h2=info,rustls=info";

/// How the subscriber should be assembled.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// Directory for the plaintext run log; `None` disables the file layer.
    pub log_dir: Option<PathBuf>,
}

impl LogOptions {
    pub fn new(debug: bool) -> Self {
        let default_filter = if debug {
            "lab=debug,lab_orchestrator=debug,lab_provider=debug,lab_config=debug"
        } else {
            "warn"
        };
        Self {
            default_filter: default_filter.to_string(),
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Keeps the non-blocking file writer alive; drop it last to flush the log.
#[derive(Debug)]
pub struct LogHandle {
    pub log_file: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Name of the run log created inside `dir` at this instant.
pub fn log_file_name() -> String {
    format!("lab_setup_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Install the global subscriber. Can only succeed once per process.
pub fn init(options: &LogOptions) -> Result<LogHandle> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let console = match format.as_str() {
        "json" => fmt::layer().with_ansi(false).json().boxed(),
        "compact" => fmt::layer().compact().boxed(),
        _ => fmt::layer().pretty().boxed(),
    }
    .with_filter(env_filter);

    let (file_layer, guard, log_file) = match &options.log_dir {
        Some(dir) => {
            let (writer, guard, path) = open_log_file(dir)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(FILE_FILTER));
            (Some(layer), Some(guard), Some(path))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LabError::Internal(format!("Failed to initialize tracing: {e}")))?;

    Ok(LogHandle {
        log_file,
        _guard: guard,
    })
}

fn open_log_file(
    dir: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let file_name = log_file_name();
    let appender = tracing_appender::rolling::never(dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard, dir.join(file_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_widens_default_filter() {
        assert_eq!(LogOptions::new(false).default_filter, "warn");
        assert!(LogOptions::new(true).default_filter.contains("lab_orchestrator=debug"));
    }

    #[test]
    fn log_file_name_is_timestamped() {
        let name = log_file_name();
        assert!(name.starts_with("lab_setup_"));
        assert!(name.ends_with(".log"));
        // lab_setup_ + YYYYmmdd_HHMMSS + .log
        assert_eq!(name.len(), "lab_setup_".len() + 15 + ".log".len());
    }

    #[test]
    fn open_log_file_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("logs");
        let (_writer, _guard, path) = open_log_file(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(path.parent(), Some(dir.as_path()));
    }
}

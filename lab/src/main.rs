// Standard library
use std::process::ExitCode;
use std::sync::OnceLock;
use uuid::Uuid;

// External crates
use clap::Parser;
use tracing::{debug, info_span, Instrument};

// Internal imports
use lab_core::{lab_error, lab_warning};
use lab_logging::LogOptions;

// Local modules
mod cli;
mod commands;

use cli::Args;
use commands::execute_command;

/// Request ID for this execution, attached to every log line of the run
static REQUEST_ID: OnceLock<String> = OnceLock::new();

fn get_request_id() -> &'static str {
    REQUEST_ID.get_or_init(|| Uuid::new_v4().to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut options = LogOptions::new(args.debug);
    if let Some(dir) = &args.log_dir {
        options = options.with_log_dir(dir);
    }
    // Dropped at the end of main so the file writer flushes.
    let log_handle = match lab_logging::init(&options) {
        Ok(handle) => Some(handle),
        Err(e) => {
            lab_warning!("Logging disabled: {}", e);
            None
        }
    };

    let span = info_span!(
        "lab",
        request_id = get_request_id(),
        command = args.command.name()
    );
    debug!(parent: &span, "starting lab command");

    let log_file = log_handle.as_ref().and_then(|h| h.log_file.clone());
    let result = execute_command(args).instrument(span).await;

    if let Some(path) = log_file {
        lab_core::lab_info!("Run log: {}", path.display());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            lab_error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

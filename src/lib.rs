pub mod collapse;
pub mod commands;
pub mod convert;
pub mod db;
pub mod errors;
pub mod export;
pub mod find_replace;
pub mod import;
pub mod library;
pub mod models;
pub mod tree;
pub mod view;

use crate::commands::AppState;
use crate::library::Library;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Prepares the data directory, starts file logging and opens the library.
pub fn open(data_dir: PathBuf) -> Result<AppState, String> {
    std::fs::create_dir_all(&data_dir).map_err(|error| error.to_string())?;
    if let Err(error) = init_tracing(&data_dir) {
        eprintln!("logging disabled: {}", error);
    }

    let library = Library::new(data_dir).map_err(|error| error.to_string())?;
    tracing::info!(data_dir = %library.data_dir().display(), "library opened");
    Ok(AppState::new(library))
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "folio.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

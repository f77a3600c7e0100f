use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use common::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Initialises the tracing subscriber, teeing output to stdout and one
/// timestamped log file per run. Returns the log file path.
pub fn init_logging(log_dir: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let file_name = format!("cpi_pipeline_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let path = Path::new(log_dir).join(file_name);
    let file = fs::File::create(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stdout.and(Mutex::new(file)))
        .init();

    Ok(path)
}

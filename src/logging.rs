use crate::config;
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MODSYNC_LOG";
const LOG_FILE_NAME: &str = "modsync.log";

/// Sends tracing output to the log file in the data dir. The TUI owns the
/// terminal, so nothing is written to stderr.
pub fn init() -> Result<PathBuf> {
    let dir = config::base_data_dir()?;
    fs::create_dir_all(&dir).context("create app data dir")?;
    let path = dir.join(LOG_FILE_NAME);
    init_at(&path)?;
    Ok(path)
}

fn init_at(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("open log file")?;
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install log subscriber: {err}"))?;
    Ok(())
}

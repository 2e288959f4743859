use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "chat-digest";

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("Unable to determine config directory")
}

pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn credentials_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials.json"))
}

pub fn credentials_lock_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials.lock"))
}

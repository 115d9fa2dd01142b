use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$TIDEMARK_HOME`, or `~/.tidemark`.
pub fn tidemark_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("TIDEMARK_HOME").filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".tidemark"))
}

pub fn ensure_tidemark_home() -> Result<PathBuf> {
    let dir = tidemark_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Where the key-value blobs live.
pub fn data_dir() -> Result<PathBuf> {
    let dir = ensure_tidemark_home()?.join("data");
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

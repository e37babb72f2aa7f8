pub mod calibrate;
pub mod contracts;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tessera_core::TesseraConfig;

/// Configuration from `path` (or defaults) with the environment applied on top.
pub fn load_config(path: Option<PathBuf>) -> Result<TesseraConfig> {
    let mut config = match path {
        Some(path) => TesseraConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TesseraConfig::default(),
    };
    config.apply_env().context("invalid TESSERA_* environment variable")?;
    Ok(config)
}

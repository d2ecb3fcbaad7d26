//! Optional TOML defaults; command-line flags take precedence

use crate::error::{Result, TransferError};
use crate::protocol::{retry, OverwriteMode, DEFAULT_CHUNK_SIZE, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File-level settings, every field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub chunk_size: Option<usize>,
    pub overwrite: Option<OverwriteMode>,
    pub progress: Option<bool>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let cfg: FileConfig =
            toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))?;
        if let Some(size) = cfg.chunk_size {
            if size == 0 || size > MAX_FRAME_SIZE * 16 {
                return Err(TransferError::Config(format!(
                    "chunk_size must be between 1 and {} bytes, got {}",
                    MAX_FRAME_SIZE * 16,
                    size
                )));
            }
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::parse(&text).map_err(|e| match e {
            TransferError::Config(msg) => {
                TransferError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }
}

/// Effective settings after merging file defaults with flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub chunk_size: usize,
    /// `None` on the receiving side means "use what the sender announces"
    pub overwrite: Option<OverwriteMode>,
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retries: retry::DEFAULT_RETRIES,
            retry_delay_ms: retry::DEFAULT_DELAY_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            overwrite: None,
            progress: true,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub overwrite: Option<OverwriteMode>,
    pub no_progress: bool,
}

impl Settings {
    pub fn resolve(file: &FileConfig, flags: &Overrides) -> Self {
        let defaults = Settings::default();
        Self {
            retries: flags.retries.or(file.retries).unwrap_or(defaults.retries),
            retry_delay_ms: flags
                .retry_delay_ms
                .or(file.retry_delay_ms)
                .unwrap_or(defaults.retry_delay_ms),
            chunk_size: file.chunk_size.unwrap_or(defaults.chunk_size),
            overwrite: flags.overwrite.or(file.overwrite),
            progress: !flags.no_progress && file.progress.unwrap_or(defaults.progress),
        }
    }
}

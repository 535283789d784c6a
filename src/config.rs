use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{DataError, Result};

pub const DEFAULT_TEMP_PREFIX: &str = "temp/data-processor";
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_QUEUE: &str = "data-processor";

/// Process-wide engine settings. Read once when a `DataProcessor` is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory acting as durable object storage.
    pub storage_root: PathBuf,
    /// Local scratch area for downloads, chunks and export files.
    pub temp_dir: PathBuf,
    /// Relative prefix for working artifacts, both locally and in storage.
    pub temp_prefix: String,
    /// Rows per chunk when a contract does not say otherwise.
    pub chunk_rows: usize,
    /// Records per batch when a contract does not say otherwise.
    pub batch_size: usize,
    /// Queue used when a contract's queue policy names none.
    pub queue: String,
    /// Upload chunks to storage so other workers can pick them up.
    pub use_cloud_temp: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            temp_dir: env::temp_dir().join("tabstream"),
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            batch_size: DEFAULT_BATCH_SIZE,
            queue: DEFAULT_QUEUE.to_string(),
            use_cloud_temp: false,
        }
    }
}

impl Settings {
    /// Parse settings from a YAML document; missing keys take defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings = parse_yaml(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Optional YAML file, then `DATA_PROCESSOR_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => {
                debug!(path = %p.display(), "loading settings file");
                let text = std::fs::read_to_string(p)?;
                parse_yaml(&text)?
            }
            None => Settings::default(),
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `DATA_PROCESSOR_*` overrides from `lookup` (the environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_PROCESSOR_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATA_PROCESSOR_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATA_PROCESSOR_TEMP_PATH") {
            self.temp_prefix = v;
        }
        if let Some(v) = lookup("DATA_PROCESSOR_CHUNK_ROWS") {
            self.chunk_rows = parse_count("DATA_PROCESSOR_CHUNK_ROWS", &v)?;
        }
        if let Some(v) = lookup("DATA_PROCESSOR_BATCH_SIZE") {
            self.batch_size = parse_count("DATA_PROCESSOR_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("DATA_PROCESSOR_QUEUE") {
            self.queue = v;
        }
        if let Some(v) = lookup("DATA_PROCESSOR_CLOUD_TEMP") {
            self.use_cloud_temp = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_rows == 0 {
            return Err(DataError::config("chunk_rows must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(DataError::config("batch_size must be at least 1"));
        }
        if self.queue.trim().is_empty() {
            return Err(DataError::config("queue name must not be empty"));
        }
        Ok(())
    }

    /// Prefix with surrounding slashes removed, as used for storage keys.
    pub fn prefix(&self) -> &str {
        self.temp_prefix.trim_matches('/')
    }

    /// Local directory holding working artifacts.
    pub fn local_temp_root(&self) -> PathBuf {
        self.temp_dir.join(self.prefix())
    }
}

/// A malformed or out-of-range value (a negative count, say) is a
/// configuration problem, not a parse failure.
fn parse_yaml(text: &str) -> Result<Settings> {
    serde_yaml::from_str(text).map_err(|e| DataError::config(format!("invalid settings: {e}")))
}

fn parse_count(key: &str, raw: &str) -> Result<usize> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| DataError::config(format!("{key} is not an integer: {raw:?}")))?;
    if value < 1 {
        return Err(DataError::config(format!("{key} must be at least 1, got {value}")));
    }
    Ok(value as usize)
}

//! Durable storage and local temp-file handling.

mod disk;

pub use disk::DiskStore;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// A logical path resolved to a file on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    /// The file was copied into the temp area and belongs to the caller.
    pub is_temp: bool,
}

/// Storage port used by the engine. All calls are synchronous; deletes are
/// idempotent.
pub trait FileStore: Send + Sync {
    /// Local file for `path`, downloading it into temp when it is not
    /// already on local disk.
    fn resolve(&self, path: &str) -> Result<ResolvedFile>;

    /// Size in bytes of a local file or stored object; 0 when neither exists.
    fn size(&self, path: &str) -> Result<u64>;

    /// Whether a stored object exists under `key`.
    fn exists(&self, key: &str) -> bool;

    /// Copy a finished local file into storage under `dest`.
    fn upload(&self, local: &Path, dest: &str) -> Result<()>;

    /// Delete a local file; absent files are fine.
    fn delete_local(&self, local: &Path) -> Result<()>;

    /// Delete a stored object; absent objects are fine.
    fn remove(&self, key: &str) -> Result<()>;

    /// Path of `name` inside the local temp area.
    fn temp_path(&self, name: &str) -> PathBuf;

    /// Fresh, uniquely named empty file in the temp area,
    /// `<prefix><random>.<ext>`.
    fn temp_file(&self, prefix: &str, ext: &str) -> Result<PathBuf>;

    fn should_chunk(&self, path: &str, max_size: u64) -> Result<bool> {
        Ok(self.size(path)? > max_size)
    }
}

use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tempfile::Builder;
use tracing::{debug, trace};

use super::{FileStore, ResolvedFile};
use crate::{
    config::Settings,
    error::{DataError, Result},
};

/// Storage backed by a directory: `root` plays the durable object store and
/// `temp_root` the local scratch area.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    temp_root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_root: temp_root.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.storage_root, settings.local_temp_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object `key` lives on disk. Keys may not climb out of the root.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DataError::Storage(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(rel))
    }

    fn ensure_temp_root(&self) -> Result<()> {
        fs::create_dir_all(&self.temp_root)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl FileStore for DiskStore {
    fn resolve(&self, path: &str) -> Result<ResolvedFile> {
        let local = Path::new(path);
        if local.is_file() {
            return Ok(ResolvedFile {
                path: local.to_path_buf(),
                is_temp: false,
            });
        }

        let stored = self.object_path(path)?;
        if !stored.is_file() {
            return Err(DataError::Storage(format!("file not found: {path}")));
        }

        self.ensure_temp_root()?;
        let base = stored
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download");
        // random prefix, original basename last so the extension survives
        let (_, temp) = Builder::new()
            .prefix("dl_")
            .suffix(&format!("_{base}"))
            .tempfile_in(&self.temp_root)?
            .keep()
            .map_err(|e| e.error)?;
        fs::copy(&stored, &temp)?;
        debug!(key = path, local = %temp.display(), "downloaded to temp");

        Ok(ResolvedFile {
            path: temp,
            is_temp: true,
        })
    }

    fn size(&self, path: &str) -> Result<u64> {
        let local = Path::new(path);
        if local.is_file() {
            return Ok(fs::metadata(local)?.len());
        }
        let stored = self.object_path(path)?;
        if stored.is_file() {
            return Ok(fs::metadata(stored)?.len());
        }
        Ok(0)
    }

    fn exists(&self, key: &str) -> bool {
        self.object_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn upload(&self, local: &Path, dest: &str) -> Result<()> {
        let target = self.object_path(dest)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // copy beside the target, then rename into place
        let tmp = target.with_extension(match target.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{ext}.tmp"),
            None => "tmp".to_string(),
        });
        fs::copy(local, &tmp)?;
        fs::rename(&tmp, &target)?;
        debug!(local = %local.display(), key = dest, "uploaded");
        Ok(())
    }

    fn delete_local(&self, local: &Path) -> Result<()> {
        trace!(path = %local.display(), "deleting local file");
        remove_if_present(local)
    }

    fn remove(&self, key: &str) -> Result<()> {
        remove_if_present(&self.object_path(key)?)
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.temp_root.join(name.trim_end_matches('/'))
    }

    fn temp_file(&self, prefix: &str, ext: &str) -> Result<PathBuf> {
        self.ensure_temp_root()?;
        let (_, path) = Builder::new()
            .prefix(prefix)
            .suffix(&format!(".{ext}"))
            .tempfile_in(&self.temp_root)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(path)
    }
}

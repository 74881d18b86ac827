//! On-disk checkpoint directory

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::checkpoint::{Checkpoint, CheckpointKind, CheckpointRef};
use crate::error::CheckpointError;

const LOCK_FILE: &str = ".lock";

/// One checkpoint root, laid out as `<root>/<owner_id>/<kind>-<millis>.json`
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    root: PathBuf,
}

/// Exclusive per-owner write lock, released on drop
#[derive(Debug)]
pub struct OwnerLock {
    file: File,
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl CheckpointDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn owner_dir(&self, owner_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_owner_id(owner_id)?;
        Ok(self.root.join(owner_id))
    }

    /// Owners that have a directory under this root
    pub fn owners(&self) -> Result<Vec<String>, CheckpointError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut owners = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                owners.push(name.to_string());
            }
        }
        owners.sort();
        Ok(owners)
    }

    /// Take the owner's advisory lock, creating the owner directory if needed
    pub fn lock(&self, owner_id: &str) -> Result<OwnerLock, CheckpointError> {
        let dir = self.owner_dir(owner_id)?;
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(OwnerLock { file })
    }

    /// Write an artifact atomically: temp file in the target dir, fsync, rename
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointRef, CheckpointError> {
        let dir = self.owner_dir(&checkpoint.owner_id)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(checkpoint.file_name());
        debug!(path = %path.display(), "CheckpointDir::write: called");

        let content = serde_json::to_vec_pretty(checkpoint).map_err(|e| CheckpointError::Persistence(e.to_string()))?;
        let mut staging = NamedTempFile::new_in(&dir)?;
        staging.write_all(&content)?;
        staging.as_file().sync_all()?;
        staging
            .persist(&path)
            .map_err(|e| CheckpointError::Persistence(format!("{}: {}", path.display(), e.error)))?;

        Ok(CheckpointRef {
            owner_id: checkpoint.owner_id.clone(),
            kind: checkpoint.kind,
            created_at: checkpoint.created_at,
            path,
        })
    }

    /// Artifacts for an owner, oldest first
    pub fn scan(&self, owner_id: &str, kind: Option<CheckpointKind>) -> Result<Vec<CheckpointRef>, CheckpointError> {
        let dir = self.owner_dir(owner_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut refs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(r) = CheckpointRef::from_path(owner_id, &path)
                && kind.is_none_or(|k| k == r.kind)
            {
                refs.push(r);
            }
        }
        refs.sort_by_key(|r| r.created_at);
        Ok(refs)
    }
}

/// Owner ids name a single directory directly under a checkpoint root
pub fn validate_owner_id(owner_id: &str) -> Result<(), CheckpointError> {
    let escapes = owner_id.is_empty()
        || owner_id == "."
        || owner_id == ".."
        || owner_id.contains(['/', '\\', '\0'])
        || Path::new(owner_id).is_absolute();
    if escapes {
        return Err(CheckpointError::InvalidOwner(owner_id.to_string()));
    }
    Ok(())
}

/// Load the artifact behind a ref
pub fn read(r: &CheckpointRef) -> Result<Checkpoint, CheckpointError> {
    let content = fs::read_to_string(&r.path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CheckpointError::NotFound(r.path.display().to_string()),
        _ => CheckpointError::Persistence(format!("{}: {}", r.path.display(), e)),
    })?;
    serde_json::from_str(&content).map_err(|e| CheckpointError::Restore(format!("{}: {}", r.path.display(), e)))
}

/// Delete the artifact behind a ref
pub fn remove(r: &CheckpointRef) -> Result<(), CheckpointError> {
    debug!(path = %r.path.display(), "remove: called");
    fs::remove_file(&r.path).map_err(|e| CheckpointError::Persistence(format!("{}: {}", r.path.display(), e)))
}

//! On-disk job state: one JSON status file plus one zero-byte lock file per
//! job, and a workspace-wide lock for resident scheduler runs.
//!
//! The lock file doubles as a crash marker. It exists exactly while a job's
//! process is running (or after a crash that never released it), so finding
//! one at load time means the previous run died without cleaning up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::scheduler::job::{BackendBinding, JobFailure};

/// Snapshot of a job's lifecycle flags, written at every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedStatus {
    pub started: bool,
    pub finished: bool,
    pub failure: Option<JobFailure>,
    pub binding: Option<BackendBinding>,
    pub slot_label: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub fn status_path(location: &Path, name: &str) -> PathBuf {
    location.join(format!(".{name}.status"))
}

pub fn lock_path(location: &Path, name: &str) -> PathBuf {
    location.join(format!(".{name}.lock"))
}

pub fn write_status(path: &Path, status: &PersistedStatus) -> Result<()> {
    let body = serde_json::to_string_pretty(status)?;
    fs::write(path, body)?;
    Ok(())
}

pub fn read_status(path: &Path) -> Result<Option<PersistedStatus>> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&body)?))
}

/// Create the lock file, failing with [`DispatchError::LockConflict`] if it
/// already exists.
pub fn acquire_lock(path: &Path) -> Result<()> {
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(DispatchError::LockConflict {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Remove the lock file. Best effort: a missing file is fine, anything else
/// is logged and swallowed so cleanup paths never fail.
pub fn release_lock(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

/// Workspace-wide lock held for the duration of a resident scheduler run.
///
/// Local and remote-shell runs take this so two schedulers cannot babysit
/// the same workspace at once. Batch-queue submission takes none, since
/// nothing stays resident after the jobs are handed off.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    held: bool,
}

impl WorkspaceLock {
    pub const FILE_NAME: &'static str = ".dispatch.running";

    pub fn acquire(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(Self::FILE_NAME);
        acquire_lock(&path)?;
        tracing::debug!(path = %path.display(), "Acquired workspace lock");
        Ok(Self { path, held: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if self.held {
            release_lock(&self.path);
            self.held = false;
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_lock_paths_are_hidden_files() {
        let loc = Path::new("/work/exp01");
        assert_eq!(status_path(loc, "train"), loc.join(".train.status"));
        assert_eq!(lock_path(loc, "train"), loc.join(".train.lock"));
    }

    #[test]
    fn status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = status_path(dir.path(), "train");
        let status = PersistedStatus {
            started: true,
            finished: true,
            failure: Some(JobFailure::Exit(2)),
            binding: Some(BackendBinding::Local),
            slot_label: Some("local".into()),
            updated_at: Utc::now(),
        };
        write_status(&path, &status).unwrap();
        let loaded = read_status(&path).unwrap().unwrap();
        assert_eq!(loaded, status);
    }

    #[test]
    fn read_status_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_status(&status_path(dir.path(), "train")).unwrap(), None);
    }

    #[test]
    fn acquire_lock_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "train");
        acquire_lock(&path).unwrap();
        let err = acquire_lock(&path).unwrap_err();
        assert!(matches!(err, DispatchError::LockConflict { .. }));
    }

    #[test]
    fn release_lock_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "train");
        acquire_lock(&path).unwrap();
        release_lock(&path);
        release_lock(&path);
        assert!(!path.exists());
    }

    #[test]
    fn workspace_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_file = dir.path().join(WorkspaceLock::FILE_NAME);
        {
            let _lock = WorkspaceLock::acquire(dir.path()).unwrap();
            assert!(lock_file.exists());
            assert!(matches!(
                WorkspaceLock::acquire(dir.path()),
                Err(DispatchError::LockConflict { .. })
            ));
        }
        assert!(!lock_file.exists());
    }
}

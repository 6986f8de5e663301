//! Workspace state persistence
//!
//! Every state file the guard owns (trust store, sessions, metrics, backup
//! metadata, roadmap) goes through the same discipline: write to a temp file
//! in the same directory, fsync, then atomically rename over the target.
//! Files are owner-readable only. Cross-process concurrency is limited by an
//! advisory file lock next to the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Storage errors surfaced to the caller. A failed update leaves the
/// previous file contents intact.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Name of the hidden per-workspace state directory.
pub const STATE_DIR_NAME: &str = ".cmdguard";

/// Resolve the state directory for a workspace, creating it (0700) on first
/// use.
pub fn state_dir(workspace: &Path) -> Result<PathBuf, StorageError> {
    let dir = workspace.join(STATE_DIR_NAME);
    ensure_private_dir(&dir)?;
    Ok(dir)
}

/// Create a directory (and parents) with owner-only permissions.
pub fn ensure_private_dir(dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(dir, perms).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

/// Write bytes to `path` atomically: temp file in the same directory, 0600,
/// fsync, rename. Readers observe either the old or the new contents, never
/// a torn write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }

    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;

    debug!(path = %path.display(), bytes = bytes.len(), "state file updated");
    Ok(())
}

/// Serialize a value as pretty JSON and persist it atomically, holding the
/// file's advisory lock for the duration of the write so concurrent
/// processes serialize their mutations.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let mut lock = StateLock::for_file(path)?;
    lock.with_exclusive(|| write_atomic(path, &bytes))?
}

/// Load a JSON state file, returning `None` when it does not exist yet.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value = serde_json::from_slice(&bytes).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Advisory cross-process lock for a state file. The lock file lives next to
/// the target with a `.lock` suffix; in-process callers additionally
/// serialize through their store owning the file.
pub struct StateLock {
    path: PathBuf,
    lock: RwLock<fs::File>,
}

impl StateLock {
    pub fn for_file(path: &Path) -> Result<Self, StorageError> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            ensure_private_dir(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StorageError::Io {
                path: lock_path.clone(),
                source,
            })?;
        Ok(Self {
            path: lock_path,
            lock: RwLock::new(file),
        })
    }

    /// Run `f` while holding the exclusive advisory lock.
    pub fn with_exclusive<R>(&mut self, f: impl FnOnce() -> R) -> Result<R, StorageError> {
        let guard = self.lock.write().map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        let result = f();
        drop(guard);
        Ok(result)
    }
}

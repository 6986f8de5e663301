//! Soft-delete interception and backup store
//!
//! Destructive filesystem commands are intercepted before they run: every
//! extant target is copied into a backup directory keyed by a random
//! identifier, and only then is the original removed. Backups can be listed,
//! restored, rotated by age/count/size, and permanently swept after a
//! retention period. Backups holding version-control metadata are flagged
//! and kept for twice the sweep threshold when VCS protection is on.
//!
//! Ordering matters for safety: copy first, persist metadata second, remove
//! originals last. A failure at any step leaves the originals in place.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SoftDeleteConfig;
use crate::storage::{self, StorageError};

const BACKUPS_DIR: &str = "backups";
const METADATA_FILE: &str = "metadata.json";
const FILES_DIR: &str = "files";

/// File names reserved by the version-control system.
const VCS_METADATA_NAMES: &[&str] = &[
    ".git",
    ".gitignore",
    ".gitattributes",
    ".gitconfig",
    ".gitmodules",
    ".gitkeep",
];

/// Commands the soft-delete manager intercepts.
const DELETE_COMMANDS: &[&str] = &["rm", "unlink", "shred"];

/// Backup errors. No variant leaves a half-deleted original: the original
/// files are only removed after both the copy and the metadata update
/// succeeded.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to copy {path} into the backup store: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove original {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0} not found")]
    NotFound(String),

    #[error("no existing files matched the delete targets")]
    NothingToDelete,
}

/// One file or directory captured by a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub size: u64,
    pub is_vcs_file: bool,
    pub is_directory: bool,
}

/// One soft-delete invocation: all files it displaced, under one id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub original_command: String,
    pub files: Vec<FileInfo>,
    pub session_id: Option<uuid::Uuid>,
    pub agent: String,
    pub total_size_bytes: u64,
    pub is_vcs_backup: bool,
}

/// Outcome of a restore: what came back and what was skipped because the
/// destination already existed.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

impl RestoreReport {
    /// A restore succeeds when at least one item made it back.
    pub fn success(&self) -> bool {
        !self.restored.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BackupMetadata {
    backups: Vec<BackupEntry>,
}

/// Workspace-scoped backup store.
pub struct SoftDeleteManager {
    root: PathBuf,
    metadata_path: PathBuf,
    config: SoftDeleteConfig,
    entries: Vec<BackupEntry>,
}

impl SoftDeleteManager {
    /// Open the backup store for a workspace.
    pub fn open(workspace: &Path, config: SoftDeleteConfig) -> Result<Self, BackupError> {
        let root = match &config.backup_dir {
            Some(dir) => dir.clone(),
            None => storage::state_dir(workspace)?.join(BACKUPS_DIR),
        };
        storage::ensure_private_dir(&root)?;

        let metadata_path = root.join(METADATA_FILE);
        let metadata: BackupMetadata = storage::load_json(&metadata_path)?.unwrap_or_default();

        Ok(Self {
            root,
            metadata_path,
            config,
            entries: metadata.backups,
        })
    }

    /// Whether argv is a destructive delete this manager should intercept.
    pub fn is_destructive_delete(argv: &[String]) -> bool {
        argv.first()
            .map(|first| {
                let base = first.rsplit('/').next().unwrap_or(first);
                DELETE_COMMANDS.contains(&base)
            })
            .unwrap_or(false)
    }

    /// Relocate every extant target of a delete command into a new backup,
    /// then remove the originals. Flags are stripped; path arguments are
    /// resolved against `cwd`.
    pub fn soft_delete(
        &mut self,
        argv: &[String],
        cwd: &Path,
        session_id: Option<uuid::Uuid>,
        agent: &str,
    ) -> Result<BackupEntry, BackupError> {
        let targets: Vec<PathBuf> = argv
            .iter()
            .skip(1)
            .filter(|arg| !arg.starts_with('-'))
            .map(|arg| {
                let trimmed = arg.trim_matches('\'').trim_matches('"');
                let path = Path::new(trimmed);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    cwd.join(path)
                }
            })
            .filter(|path| path.symlink_metadata().is_ok())
            .collect();

        if targets.is_empty() {
            return Err(BackupError::NothingToDelete);
        }

        let id = random_backup_id();
        let files_root = self.root.join(&id).join(FILES_DIR);

        let mut files = Vec::with_capacity(targets.len());
        let mut total_size = 0u64;

        for target in &targets {
            let relative = target
                .strip_prefix("/")
                .unwrap_or(target.as_path())
                .to_path_buf();
            let backup_path = files_root.join(&relative);

            let copy_result = copy_preserving(target, &backup_path);
            let size = match copy_result {
                Ok(size) => size,
                Err(source) => {
                    // Abort without touching any original.
                    let _ = fs::remove_dir_all(self.root.join(&id));
                    return Err(BackupError::Copy {
                        path: target.clone(),
                        source,
                    });
                }
            };

            let is_directory = target.is_dir();
            let is_vcs_file = is_vcs_path(target);
            total_size += size;
            files.push(FileInfo {
                original_path: target.clone(),
                backup_path,
                size,
                is_vcs_file,
                is_directory,
            });
        }

        let entry = BackupEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            original_command: argv.join(" "),
            is_vcs_backup: files.iter().any(|f| f.is_vcs_file),
            session_id,
            agent: agent.to_string(),
            total_size_bytes: total_size,
            files,
        };

        self.entries.push(entry.clone());
        if let Err(err) = self.persist() {
            self.entries.pop();
            let _ = fs::remove_dir_all(self.root.join(&id));
            return Err(err);
        }

        // Copies and metadata are safe; now the originals can go.
        for target in &targets {
            let result = if target.is_dir() {
                fs::remove_dir_all(target)
            } else {
                fs::remove_file(target)
            };
            if let Err(source) = result {
                return Err(BackupError::Remove {
                    path: target.clone(),
                    source,
                });
            }
        }

        debug!(backup = %id, files = entry.files.len(), "soft delete completed");
        Ok(entry)
    }

    /// Restore a backup to the original locations, or under `target` when
    /// given. Children of a restored directory are not restored separately,
    /// and existing destinations are skipped.
    pub fn restore(
        &self,
        id: &str,
        target: Option<&Path>,
    ) -> Result<RestoreReport, BackupError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let mut report = RestoreReport::default();

        for item in top_level_items(&entry.files) {
            let destination = match target {
                Some(base) => {
                    let name = item
                        .original_path
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(&entry.id));
                    base.join(name)
                }
                None => item.original_path.clone(),
            };

            if destination.symlink_metadata().is_ok() {
                warn!(path = %destination.display(), "restore target exists, skipping");
                report.skipped.push(destination);
                continue;
            }

            copy_preserving(&item.backup_path, &destination).map_err(|source| {
                BackupError::Copy {
                    path: item.backup_path.clone(),
                    source,
                }
            })?;
            report.restored.push(destination);
        }

        Ok(report)
    }

    /// All backups, newest first.
    pub fn list(&self) -> Vec<&BackupEntry> {
        let mut entries: Vec<&BackupEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Apply the retention bounds: max age, max count, max total size, each
    /// evaluated newest-first. Returns the ids that were dropped. Dropped
    /// backups are gone for good; rotation never re-creates one.
    pub fn cleanup(&mut self) -> Result<Vec<String>, BackupError> {
        let now = Utc::now();
        let max_age = Duration::days(i64::from(self.config.max_age_days));
        let max_total_bytes = self.config.max_size_mb * 1024 * 1024;

        let mut sorted: Vec<BackupEntry> = self.entries.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        let mut running_size = 0u64;

        for (index, entry) in sorted.into_iter().enumerate() {
            let age_ok = now - entry.timestamp <= max_age;
            let count_ok = index < self.config.max_backups;
            let size_ok = running_size + entry.total_size_bytes <= max_total_bytes;

            if age_ok && count_ok && size_ok {
                running_size += entry.total_size_bytes;
                kept.push(entry);
            } else {
                dropped.push(entry);
            }
        }

        if dropped.is_empty() {
            return Ok(Vec::new());
        }

        let previous = std::mem::replace(&mut self.entries, kept);
        if let Err(err) = self.persist() {
            self.entries = previous;
            return Err(err);
        }

        let mut dropped_ids = Vec::with_capacity(dropped.len());
        for entry in dropped {
            let _ = fs::remove_dir_all(self.root.join(&entry.id));
            debug!(backup = %entry.id, "backup rotated out");
            dropped_ids.push(entry.id);
        }
        Ok(dropped_ids)
    }

    /// Permanently delete backups older than the auto-delete threshold.
    /// VCS-flagged backups get double the retention when protection is on.
    pub fn sweep_expired(&mut self) -> Result<usize, BackupError> {
        let now = Utc::now();
        let threshold = Duration::days(i64::from(self.config.auto_delete_after_days));

        let (kept, expired): (Vec<BackupEntry>, Vec<BackupEntry>) =
            self.entries.clone().into_iter().partition(|entry| {
                let limit = if entry.is_vcs_backup && self.config.protect_vcs {
                    threshold * 2
                } else {
                    threshold
                };
                now - entry.timestamp <= limit
            });

        if expired.is_empty() {
            return Ok(0);
        }

        let previous = std::mem::replace(&mut self.entries, kept);
        if let Err(err) = self.persist() {
            self.entries = previous;
            return Err(err);
        }

        let count = expired.len();
        for entry in expired {
            let _ = fs::remove_dir_all(self.root.join(&entry.id));
        }
        Ok(count)
    }

    /// Permanently delete one backup by id.
    pub fn delete_backup(&mut self, id: &str) -> Result<(), BackupError> {
        let position = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let removed = self.entries.remove(position);
        if let Err(err) = self.persist() {
            self.entries.insert(position, removed);
            return Err(err);
        }

        let _ = fs::remove_dir_all(self.root.join(&removed.id));
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn persist(&self) -> Result<(), BackupError> {
        let metadata = BackupMetadata {
            backups: self.entries.clone(),
        };
        storage::save_json(&self.metadata_path, &metadata)?;
        Ok(())
    }
}

/// 16 hex characters of randomness.
fn random_backup_id() -> String {
    let mut rng = rand::rng();
    (0..16)
        .map(|_| {
            let nibble: u8 = rng.random_range(0..16);
            std::char::from_digit(u32::from(nibble), 16).unwrap_or('0')
        })
        .collect()
}

/// `.git` itself, anything under `.git/`, or a reserved VCS file name.
fn is_vcs_path(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str().to_string_lossy() == ".git")
    {
        return true;
    }
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            VCS_METADATA_NAMES.iter().any(|v| *v == name)
        })
        .unwrap_or(false)
}

/// Recursive copy preserving file modes. Returns the total bytes copied.
fn copy_preserving(src: &Path, dst: &Path) -> std::io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let metadata = src.symlink_metadata()?;
    if metadata.is_dir() {
        fs::create_dir_all(dst)?;
        fs::set_permissions(dst, metadata.permissions())?;

        let mut total = 0u64;
        for child in fs::read_dir(src)? {
            let child = child?;
            total += copy_preserving(&child.path(), &dst.join(child.file_name()))?;
        }
        Ok(total)
    } else {
        let size = fs::copy(src, dst)?;
        fs::set_permissions(dst, metadata.permissions())?;
        Ok(size)
    }
}

/// Reduce a backup's files to top-level items: directories that are not
/// inside another captured directory, and files not under any captured
/// directory.
fn top_level_items(files: &[FileInfo]) -> Vec<&FileInfo> {
    let dirs: Vec<&FileInfo> = files.iter().filter(|f| f.is_directory).collect();

    let is_under_captured_dir = |path: &Path| {
        dirs.iter()
            .any(|dir| path != dir.original_path && path.starts_with(&dir.original_path))
    };

    files
        .iter()
        .filter(|f| !is_under_captured_dir(&f.original_path))
        .collect()
}

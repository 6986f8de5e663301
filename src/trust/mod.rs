//! Persistent trust store for previously approved commands
//!
//! Commands are keyed by a SHA-256 digest over the raw command bytes, so
//! whitespace variants yield distinct entries and the plaintext never needs
//! to be retained. Entries may carry an expiry; an expired entry is treated
//! as absent. The store is one JSON file updated via write-to-temp plus
//! atomic rename, owner-readable only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::storage::{self, StorageError};

/// Trust-store errors. A failed persist leaves both the file and the
/// in-memory state unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("command is not in the trust store")]
    NotFound,
}

/// One approved command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEntry {
    pub hash: String,
    pub approved_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub use_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub note: String,
}

impl TrustEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrustFile {
    entries: HashMap<String, TrustEntry>,
}

/// Content-addressed set of approved command strings.
pub struct TrustStore {
    path: PathBuf,
    entries: HashMap<String, TrustEntry>,
}

impl TrustStore {
    /// Open (or create) the trust store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrustStoreError> {
        let path = path.into();
        let file: Option<TrustFile> = storage::load_json(&path)?;
        Ok(Self {
            path,
            entries: file.map(|f| f.entries).unwrap_or_default(),
        })
    }

    /// Digest over the raw command bytes. Deliberately not normalized:
    /// `ls -la` and `ls  -la` are distinct entries.
    pub fn hash_command(command: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(command.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether the command has a live (non-expired) entry.
    pub fn is_trusted(&self, command: &str) -> bool {
        let hash = Self::hash_command(command);
        self.entries
            .get(&hash)
            .map(|e| !e.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Approve a command, optionally for a limited time.
    pub fn add(
        &mut self,
        command: &str,
        ttl: Option<Duration>,
        note: impl Into<String>,
    ) -> Result<(), TrustStoreError> {
        let now = Utc::now();
        let hash = Self::hash_command(command);
        let entry = TrustEntry {
            hash: hash.clone(),
            approved_at: now,
            expires_at: ttl.map(|d| now + d),
            use_count: 0,
            last_used_at: None,
            note: note.into(),
        };

        let previous = self.entries.insert(hash.clone(), entry);
        if let Err(err) = self.persist() {
            // Roll back so memory matches the file that was not updated.
            match previous {
                Some(prev) => self.entries.insert(hash, prev),
                None => self.entries.remove(&hash),
            };
            return Err(err);
        }
        debug!(hash = %hash, "trust entry added");
        Ok(())
    }

    /// Remove a command's entry.
    pub fn remove(&mut self, command: &str) -> Result<(), TrustStoreError> {
        let hash = Self::hash_command(command);
        let previous = self.entries.remove(&hash).ok_or(TrustStoreError::NotFound)?;
        if let Err(err) = self.persist() {
            self.entries.insert(hash, previous);
            return Err(err);
        }
        Ok(())
    }

    /// Bump the usage counters for a trusted command.
    pub fn record_use(&mut self, command: &str) -> Result<(), TrustStoreError> {
        let hash = Self::hash_command(command);
        let entry = self.entries.get_mut(&hash).ok_or(TrustStoreError::NotFound)?;
        let previous = entry.clone();
        entry.use_count += 1;
        entry.last_used_at = Some(Utc::now());

        if let Err(err) = self.persist() {
            self.entries.insert(hash, previous);
            return Err(err);
        }
        Ok(())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn clean_expired(&mut self) -> Result<usize, TrustStoreError> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(hash, _)| hash.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let mut removed = Vec::new();
        for hash in &expired {
            if let Some(entry) = self.entries.remove(hash) {
                removed.push((hash.clone(), entry));
            }
        }

        if let Err(err) = self.persist() {
            for (hash, entry) in removed {
                self.entries.insert(hash, entry);
            }
            return Err(err);
        }
        Ok(expired.len())
    }

    /// All entries, expired included, for inspection.
    pub fn list(&self) -> Vec<&TrustEntry> {
        let mut entries: Vec<&TrustEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.approved_at);
        entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), TrustStoreError> {
        let file = TrustFile {
            entries: self.entries.clone(),
        };
        storage::save_json(&self.path, &file)?;
        Ok(())
    }
}

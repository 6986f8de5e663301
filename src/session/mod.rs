//! Per-workspace session recording
//!
//! A session is an append-only log of every command the guard intercepted
//! for one agent in one workspace. One session is active per workspace at a
//! time; its id lives in the `CMDGUARD_SESSION` environment variable or the
//! workspace's `active_session` marker file, read per invocation. Ended
//! sessions are read-only.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::CommandRecord;
use crate::storage::{self, StorageError};

/// Environment variable carrying the active session id.
pub const SESSION_ENV_VAR: &str = "CMDGUARD_SESSION";

const ACTIVE_MARKER: &str = "active_session";
const SESSIONS_DIR: &str = "sessions";

/// Session errors. Failed persists roll the in-memory session back, so the
/// file and memory never diverge by more than the one lost append.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session has ended and is read-only")]
    Ended,
}

/// A recorded session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub agent_name: String,
    pub workspace: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub commands: Vec<CommandRecord>,
    pub violations_count: u64,
    pub risk_score: f64,
}

impl Session {
    fn new(agent_name: impl Into<String>, workspace: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_name: agent_name.into(),
            workspace,
            started_at: Utc::now(),
            ended_at: None,
            commands: Vec::new(),
            violations_count: 0,
            risk_score: 0.0,
        }
    }
}

/// Records commands into the active session for a workspace.
pub struct SessionRecorder {
    sessions_dir: PathBuf,
    marker_path: PathBuf,
    session: Session,
}

impl SessionRecorder {
    /// Start a fresh session and mark it active for the workspace.
    pub fn start(workspace: &Path, agent_name: &str) -> Result<Self, SessionError> {
        let state_dir = storage::state_dir(workspace)?;
        let sessions_dir = state_dir.join(SESSIONS_DIR);
        let marker_path = state_dir.join(ACTIVE_MARKER);

        let session = Session::new(agent_name, workspace.to_path_buf());
        let recorder = Self {
            sessions_dir,
            marker_path,
            session,
        };
        recorder.persist()?;
        storage::write_atomic(&recorder.marker_path, recorder.session.id.to_string().as_bytes())?;

        debug!(session = %recorder.session.id, "session started");
        Ok(recorder)
    }

    /// Resume the workspace's active session, if one is marked.
    pub fn resume_active(workspace: &Path) -> Result<Option<Self>, SessionError> {
        let state_dir = storage::state_dir(workspace)?;
        let sessions_dir = state_dir.join(SESSIONS_DIR);
        let marker_path = state_dir.join(ACTIVE_MARKER);

        let id = match std::env::var(SESSION_ENV_VAR) {
            Ok(value) => value.trim().parse::<Uuid>().ok(),
            Err(_) => std::fs::read_to_string(&marker_path)
                .ok()
                .and_then(|s| s.trim().parse::<Uuid>().ok()),
        };

        let Some(id) = id else {
            return Ok(None);
        };

        let path = sessions_dir.join(format!("{id}.json"));
        let Some(session) = storage::load_json::<Session>(&path)? else {
            return Ok(None);
        };
        if session.ended_at.is_some() {
            return Ok(None);
        }

        Ok(Some(Self {
            sessions_dir,
            marker_path,
            session,
        }))
    }

    /// Resume the active session or start a new one.
    pub fn resume_or_start(workspace: &Path, agent_name: &str) -> Result<Self, SessionError> {
        match Self::resume_active(workspace)? {
            Some(recorder) => Ok(recorder),
            None => Self::start(workspace, agent_name),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Append a command record. The risk score only ever grows, and an
    /// unapproved record counts as a violation.
    pub fn add_command(&mut self, record: CommandRecord) -> Result<(), SessionError> {
        if self.session.ended_at.is_some() {
            return Err(SessionError::Ended);
        }

        let previous_violations = self.session.violations_count;
        let previous_score = self.session.risk_score;

        if !record.approved {
            self.session.violations_count += 1;
        }
        self.session.risk_score += f64::from(record.risk_level.score());
        self.session.commands.push(record);

        if let Err(err) = self.persist() {
            self.session.commands.pop();
            self.session.violations_count = previous_violations;
            self.session.risk_score = previous_score;
            return Err(err);
        }
        Ok(())
    }

    /// Close the session and clear the active marker.
    pub fn end(&mut self) -> Result<(), SessionError> {
        if self.session.ended_at.is_some() {
            return Ok(());
        }

        self.session.ended_at = Some(Utc::now());
        if let Err(err) = self.persist() {
            self.session.ended_at = None;
            return Err(err);
        }

        let _ = std::fs::remove_file(&self.marker_path);
        debug!(session = %self.session.id, "session ended");
        Ok(())
    }

    /// Load one session by id, for inspection.
    pub fn load(workspace: &Path, id: Uuid) -> Result<Session, SessionError> {
        let path = storage::state_dir(workspace)?
            .join(SESSIONS_DIR)
            .join(format!("{id}.json"));
        storage::load_json(&path)?.ok_or(SessionError::NotFound(id))
    }

    /// All sessions recorded for the workspace, oldest first.
    pub fn list(workspace: &Path) -> Result<Vec<Session>, SessionError> {
        let dir = storage::state_dir(workspace)?.join(SESSIONS_DIR);
        let mut sessions = Vec::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(source) => {
                return Err(StorageError::Io {
                    path: dir,
                    source,
                }
                .into())
            }
        };

        for entry in entries.flatten() {
            if entry.path().extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(session) = storage::load_json::<Session>(&entry.path())? {
                    sessions.push(session);
                }
            }
        }

        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    fn persist(&self) -> Result<(), SessionError> {
        let path = self.sessions_dir.join(format!("{}.json", self.session.id));
        storage::save_json(&path, &self.session)?;
        Ok(())
    }
}

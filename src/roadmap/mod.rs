//! Per-workspace planning artifacts
//!
//! Small named roadmap documents with milestones, kept alongside the other
//! workspace state. Peripheral to the guard pipeline but persisted with the
//! same atomic discipline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageError};

const ROADMAP_FILE: &str = "roadmap.json";

#[derive(Debug, thiserror::Error)]
pub enum RoadmapError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("roadmap '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Planned,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub status: MilestoneStatus,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roadmap {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RoadmapFile {
    roadmaps: Vec<Roadmap>,
}

/// Store for a workspace's roadmaps.
pub struct RoadmapStore {
    path: PathBuf,
    roadmaps: Vec<Roadmap>,
}

impl RoadmapStore {
    pub fn open(workspace: &Path) -> Result<Self, RoadmapError> {
        let path = storage::state_dir(workspace)?.join(ROADMAP_FILE);
        let file: RoadmapFile = storage::load_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            roadmaps: file.roadmaps,
        })
    }

    pub fn list(&self) -> &[Roadmap] {
        &self.roadmaps
    }

    pub fn get(&self, name: &str) -> Option<&Roadmap> {
        self.roadmaps.iter().find(|r| r.name == name)
    }

    /// Insert or replace a roadmap by name.
    pub fn put(&mut self, name: &str, milestones: Vec<Milestone>) -> Result<(), RoadmapError> {
        let now = Utc::now();
        let previous = self.roadmaps.clone();

        match self.roadmaps.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                existing.milestones = milestones;
                existing.updated_at = now;
            }
            None => self.roadmaps.push(Roadmap {
                name: name.to_string(),
                created_at: now,
                updated_at: now,
                milestones,
            }),
        }

        if let Err(err) = self.persist() {
            self.roadmaps = previous;
            return Err(err);
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), RoadmapError> {
        let position = self
            .roadmaps
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RoadmapError::NotFound(name.to_string()))?;

        let removed = self.roadmaps.remove(position);
        if let Err(err) = self.persist() {
            self.roadmaps.insert(position, removed);
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), RoadmapError> {
        let file = RoadmapFile {
            roadmaps: self.roadmaps.clone(),
        };
        storage::save_json(&self.path, &file)?;
        Ok(())
    }
}

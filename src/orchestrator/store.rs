//! Queue persistence
//!
//! Full JSON snapshot of the task list, written atomically: serialize to a
//! temp file, then rename into place. A reader can never observe a
//! partially written snapshot. The snapshot is idempotently
//! reconstructible from in-memory state, so last-write-wins ordering
//! between overlapping saves is acceptable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queue::Task;
use crate::Result;

/// On-disk format: `{tasks, updatedAt}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQueue {
    pub tasks: Vec<Task>,
    pub updated_at: DateTime<Utc>,
}

/// Handles queue persistence to the filesystem.
#[derive(Debug, Clone)]
pub struct QueueStore {
    file_path: PathBuf,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new(".mend/queue.json")
    }
}

impl QueueStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Save a full snapshot (atomic write-then-rename).
    ///
    /// If the target directory vanished mid-write (a crash-window race,
    /// common in tests tearing down temp dirs), the save is a no-op.
    /// Every other failure propagates: silently losing durability would
    /// corrupt the crash-recovery guarantees.
    pub async fn save(&self, tasks: &[Task]) -> Result<()> {
        if let Some(dir) = self.file_path.parent() {
            if !dir.as_os_str().is_empty() {
                match tokio::fs::create_dir_all(dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let snapshot = PersistedQueue {
            tasks: tasks.to_vec(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let temp_path = self.temp_path();
        let write_result = async {
            tokio::fs::write(&temp_path, &json).await?;
            tokio::fs::rename(&temp_path, &self.file_path).await
        }
        .await;

        match write_result {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                if e.kind() == ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Load the persisted tasks, or an empty list when no snapshot exists.
    pub async fn load(&self) -> Result<Vec<Task>> {
        let content = match tokio::fs::read_to_string(&self.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let snapshot: PersistedQueue = serde_json::from_str(&content)?;
        Ok(snapshot.tasks)
    }

    /// Delete the snapshot, tolerating absence.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.file_path.clone().into_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }
}

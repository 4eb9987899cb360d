//! File change events flowing from the watcher into batch invalidation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    /// `file_path` of the event is the new location.
    Rename { from: PathBuf },
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::Rename { .. } => "rename",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    fn new(
        file_path: impl Into<PathBuf>,
        change_type: ChangeType,
        old_content: Option<String>,
        new_content: Option<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            change_type,
            old_content,
            new_content,
            timestamp: Utc::now(),
        }
    }

    pub fn added(file_path: impl Into<PathBuf>, content: Option<String>) -> Self {
        Self::new(file_path, ChangeType::Add, None, content)
    }

    pub fn modified(
        file_path: impl Into<PathBuf>,
        old_content: Option<String>,
        new_content: Option<String>,
    ) -> Self {
        Self::new(file_path, ChangeType::Modify, old_content, new_content)
    }

    pub fn deleted(file_path: impl Into<PathBuf>, old_content: Option<String>) -> Self {
        Self::new(file_path, ChangeType::Delete, old_content, None)
    }

    pub fn renamed(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        content: Option<String>,
    ) -> Self {
        Self::new(
            to,
            ChangeType::Rename { from: from.into() },
            content.clone(),
            content,
        )
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Whether the file is gone from its previous location.
    pub fn removes_file(&self) -> bool {
        matches!(
            self.change_type,
            ChangeType::Delete | ChangeType::Rename { .. }
        )
    }
}

/// Destination for debounced change events.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn submit(&self, change: ChangeEvent);
}

#[async_trait]
impl ChangeSink for mpsc::Sender<ChangeEvent> {
    async fn submit(&self, change: ChangeEvent) {
        if self.send(change).await.is_err() {
            crate::debug_event!("change", "dropped", "receiver closed");
        }
    }
}

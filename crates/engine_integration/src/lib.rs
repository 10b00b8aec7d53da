//! Embedding surface of the labeling engine.
//!
//! The session controller drives the engine only through [`LabelingEngine`]
//! and reads its state through the snapshots it exposes. The engine reports
//! user actions back as [`EngineHook`] values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{AnnotationId, DraftId, PredictionId, ProjectId, TaskId},
    protocol::{Annotation, Prediction, ReviewHistoryEntry, Task},
};
use thiserror::Error;

mod memory;

pub use memory::InMemoryEngine;

/// Engine-side annotation identifier. Stable for the lifetime of the engine
/// store, unlike `pk` which only exists after the server persisted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalAnnotationId(pub String);

impl LocalAnnotationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for LocalAnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has not been booted")]
    NotBooted,
    #[error("engine boot failed: {0}")]
    Boot(String),
    #[error("annotation {0} is not present in the engine store")]
    UnknownAnnotation(LocalAnnotationId),
}

/// Snapshot of one annotation as the engine holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineAnnotation {
    pub id: LocalAnnotationId,
    pub pk: Option<AnnotationId>,
    pub user_generate: bool,
    pub sent_user_generate: bool,
    pub draft_id: Option<DraftId>,
    pub parent_prediction: Option<PredictionId>,
    pub parent_annotation: Option<AnnotationId>,
    pub ground_truth: bool,
    pub was_cancelled: bool,
    pub created_by: Option<String>,
    pub created_ago: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub loaded_at: DateTime<Utc>,
    /// Deserialized content, opaque to the controller.
    pub result: Value,
    /// Raw draft version, kept apart from `result` so drafts are never
    /// serialized twice.
    pub draft_version: Option<Value>,
    pub history_frozen: bool,
}

impl EngineAnnotation {
    /// True once the server has confirmed the annotation at least once.
    pub fn is_persisted(&self) -> bool {
        !self.user_generate || self.sent_user_generate
    }

    /// Created here and never sent: no stable `pk` to reference.
    pub fn is_unsent(&self) -> bool {
        self.user_generate && !self.sent_user_generate
    }

    /// Server-shaped view handed to host notifications and task merges.
    pub fn to_server(&self) -> Annotation {
        Annotation {
            pk: self.pk,
            result: self.result.clone(),
            lead_time: None,
            was_cancelled: self.was_cancelled,
            ground_truth: self.ground_truth,
            user_generate: self.user_generate,
            sent_user_generate: self.sent_user_generate,
            draft_id: self.draft_id,
            review_status: None,
            parent_prediction: self.parent_prediction,
            parent_annotation: self.parent_annotation,
            created_username: self.created_by.clone(),
            created_ago: self.created_ago.clone(),
            created_at: self.created_date,
        }
    }
}

/// Options for creating a fresh annotation in the engine store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAnnotation {
    pub draft: Option<Value>,
    pub user_generate: bool,
    pub created_by: Option<String>,
    pub created_ago: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
}

impl NewAnnotation {
    pub fn user_generated() -> Self {
        Self {
            user_generate: true,
            ..Self::default()
        }
    }
}

/// Task in the format the engine store is initialized from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineTask {
    pub id: TaskId,
    pub data: Value,
    pub annotations: Vec<Annotation>,
    pub predictions: Vec<Prediction>,
    pub annotation_history: Vec<ReviewHistoryEntry>,
}

impl EngineTask {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id,
            data: task.data.clone(),
            annotations: task.annotations.clone(),
            predictions: task.predictions.clone(),
            annotation_history: task.history.clone().unwrap_or_default(),
        }
    }
}

/// Partial flag update; `None` leaves the engine's current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineFlags {
    pub is_loading: Option<bool>,
    pub no_task: Option<bool>,
}

impl EngineFlags {
    pub fn loading(is_loading: bool) -> Self {
        Self {
            is_loading: Some(is_loading),
            no_task: None,
        }
    }

    pub fn no_task(no_task: bool) -> Self {
        Self {
            is_loading: None,
            no_task: Some(no_task),
        }
    }
}

/// Everything the engine is booted with. Logged in full when boot fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSettings {
    pub project_id: ProjectId,
    pub user: Option<Value>,
    pub config: Option<String>,
    pub task: Option<EngineTask>,
    pub description: Option<String>,
    pub interfaces: Vec<String>,
    pub force_auto_annotation: bool,
    pub force_auto_accept_suggestions: bool,
}

/// Lifecycle callbacks the engine fires back at its embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineHook {
    Load,
    StorageInitialized,
    TaskLoad,
    SubmitDraft {
        annotation: LocalAnnotationId,
    },
    SubmitAnnotation,
    UpdateAnnotation {
        annotation: LocalAnnotationId,
    },
    /// Fired after the engine dropped the annotation from its own list, so the
    /// snapshot is carried by value.
    DeleteAnnotation {
        annotation: EngineAnnotation,
    },
    AcceptAnnotation {
        is_dirty: bool,
    },
    RejectAnnotation {
        comment: Option<String>,
    },
    SkipTask,
    CancelSkippingTask,
    EntityCreate {
        region: Value,
    },
    EntityDelete {
        region: Value,
    },
    SelectAnnotation {
        annotation: LocalAnnotationId,
    },
    NextTask {
        task: Option<TaskId>,
        annotation: Option<AnnotationId>,
    },
    PrevTask {
        task: Option<TaskId>,
        annotation: Option<AnnotationId>,
    },
}

impl EngineHook {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::StorageInitialized => "storage_initialized",
            Self::TaskLoad => "task_load",
            Self::SubmitDraft { .. } => "submit_draft",
            Self::SubmitAnnotation => "submit_annotation",
            Self::UpdateAnnotation { .. } => "update_annotation",
            Self::DeleteAnnotation { .. } => "delete_annotation",
            Self::AcceptAnnotation { .. } => "accept_annotation",
            Self::RejectAnnotation { .. } => "reject_annotation",
            Self::SkipTask => "skip_task",
            Self::CancelSkippingTask => "cancel_skipping_task",
            Self::EntityCreate { .. } => "entity_create",
            Self::EntityDelete { .. } => "entity_delete",
            Self::SelectAnnotation { .. } => "select_annotation",
            Self::NextTask { .. } => "next_task",
            Self::PrevTask { .. } => "prev_task",
        }
    }
}

/// Commands and readable state of an embedded labeling engine.
///
/// Annotations are listed newest first: anything added to the store is
/// placed at the front, so the first element is the most recent one.
pub trait LabelingEngine: Send {
    fn boot(&mut self, settings: &EngineSettings) -> anyhow::Result<()>;
    fn reset_state(&mut self);
    fn assign_task(&mut self, task: &Task);
    fn initialize_store(&mut self, task: EngineTask);
    fn set_flags(&mut self, flags: EngineFlags);

    fn annotations(&self) -> &[EngineAnnotation];
    fn predictions(&self) -> &[Prediction];
    fn selected(&self) -> Option<&EngineAnnotation>;

    fn annotation(&self, id: &LocalAnnotationId) -> Option<&EngineAnnotation> {
        self.annotations()
            .iter()
            .find(|annotation| &annotation.id == id)
    }

    fn annotation_by_pk(&self, pk: AnnotationId) -> Option<&EngineAnnotation> {
        self.annotations()
            .iter()
            .find(|annotation| annotation.pk == Some(pk))
    }

    fn select_annotation(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError>;
    fn add_annotation(&mut self, options: NewAnnotation) -> LocalAnnotationId;
    fn add_annotation_from_prediction(&mut self, prediction: &Prediction) -> LocalAnnotationId;
    /// Drops an annotation from the store; unknown ids are ignored.
    fn remove_annotation(&mut self, id: &LocalAnnotationId);

    fn freeze_history(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError>;
    /// No-op when the history is not frozen.
    fn unfreeze_history(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError>;
    fn add_draft_version(&mut self, id: &LocalAnnotationId, draft: Value)
        -> Result<(), EngineError>;
    fn delete_all_regions(
        &mut self,
        id: &LocalAnnotationId,
        delete_read_only: bool,
    ) -> Result<(), EngineError>;
    fn deserialize_results(
        &mut self,
        id: &LocalAnnotationId,
        result: &Value,
    ) -> Result<(), EngineError>;
    fn set_draft_id(
        &mut self,
        id: &LocalAnnotationId,
        draft_id: Option<DraftId>,
    ) -> Result<(), EngineError>;
    /// Records the server-assigned key and marks the annotation as sent.
    fn update_personal_key(
        &mut self,
        id: &LocalAnnotationId,
        pk: AnnotationId,
    ) -> Result<(), EngineError>;
    fn serialize_annotation(&self, id: &LocalAnnotationId) -> Result<Value, EngineError>;
    fn pause_autosave(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError>;

    fn destroy(&mut self);
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;

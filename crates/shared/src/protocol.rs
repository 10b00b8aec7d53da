use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AnnotationId, DraftId, PredictionId, ProjectId, ReviewOutcome, TaskId};

fn empty_result() -> Value {
    Value::Array(Vec::new())
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub drafts: Vec<Draft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ReviewHistoryEntry>>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            data: Value::Null,
            annotations: Vec::new(),
            predictions: Vec::new(),
            drafts: Vec::new(),
            history: None,
        }
    }

    /// Most recently created persisted annotation, falling back to list order
    /// when creation times are unknown.
    pub fn last_annotation(&self) -> Option<&Annotation> {
        let dated = self
            .annotations
            .iter()
            .filter(|annotation| annotation.created_at.is_some())
            .max_by_key(|annotation| annotation.created_at);
        dated.or_else(|| self.annotations.last())
    }

    pub fn annotation_by_pk(&self, pk: AnnotationId) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|annotation| annotation.pk == Some(pk))
    }

    pub fn remove_draft(&mut self, draft_id: DraftId) -> Option<Draft> {
        let index = self.drafts.iter().position(|draft| draft.id == draft_id)?;
        Some(self.drafts.remove(index))
    }
}

/// Server-format annotation. `pk` is only present once the server has
/// persisted it; locally created annotations carried across a task refresh
/// keep `pk == None` and `user_generate == true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<AnnotationId>,
    #[serde(default = "empty_result")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_time: Option<f64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub was_cancelled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ground_truth: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub user_generate: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sent_user_generate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<DraftId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_status: Option<ReviewOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_prediction: Option<PredictionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_annotation: Option<AnnotationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ago: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Annotation {
    pub fn persisted(pk: AnnotationId, result: Value) -> Self {
        Self {
            pk: Some(pk),
            result,
            lead_time: None,
            was_cancelled: false,
            ground_truth: false,
            user_generate: false,
            sent_user_generate: false,
            draft_id: None,
            review_status: None,
            parent_prediction: None,
            parent_annotation: None,
            created_username: None,
            created_ago: None,
            created_at: None,
        }
    }

    /// True when the server has ever confirmed this annotation.
    pub fn is_persisted(&self) -> bool {
        self.pk.is_some() && (!self.user_generate || self.sent_user_generate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub id: DraftId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    /// Annotation the draft edits; `None` for a draft of a not-yet-created
    /// annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationId>,
    #[serde(default = "empty_result")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ago: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: PredictionId,
    #[serde(default = "empty_result")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewHistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<AnnotationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub label_config: Option<String>,
    #[serde(default)]
    pub show_collab_predictions: bool,
    #[serde(default = "default_true")]
    pub enable_empty_annotation: bool,
    #[serde(default = "default_true")]
    pub show_skip_button: bool,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub expert_instruction: Option<String>,
}

impl Project {
    pub fn new(id: ProjectId) -> Self {
        Self {
            id,
            title: String::new(),
            label_config: None,
            show_collab_predictions: false,
            enable_empty_annotation: true,
            show_skip_button: true,
            instruction: None,
            expert_instruction: None,
        }
    }

    /// Instruction text shown by the engine, `None` when blank.
    pub fn instruction_text(&self) -> Option<String> {
        let raw = self
            .instruction
            .as_deref()
            .or(self.expert_instruction.as_deref())
            .unwrap_or_default()
            .trim();
        (!raw.is_empty()).then(|| raw.to_string())
    }
}

/// Transport body for annotation create/update and draft writes.
///
/// `id` is attached only when the caller asked for it and the annotation has
/// been persisted; its absence is what distinguishes a create from an update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AnnotationId>,
    pub lead_time: Option<f64>,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<DraftId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_prediction: Option<PredictionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_annotation: Option<AnnotationId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub was_cancelled: bool,
}

impl AnnotationPayload {
    /// Splits the identifier off the body, leaving what goes over the wire.
    pub fn take_id(&mut self) -> Option<AnnotationId> {
        self.id.take()
    }
}

/// Body sent when an unskipped annotation's draft is detached from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DetachDraftBody {
    pub annotation: Option<AnnotationId>,
}

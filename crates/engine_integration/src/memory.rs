use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::{AnnotationId, DraftId, TaskId},
    protocol::{Annotation, Prediction, Task},
};
use tracing::debug;

use crate::{
    EngineAnnotation, EngineError, EngineFlags, EngineSettings, EngineTask, LabelingEngine,
    LocalAnnotationId, NewAnnotation,
};

/// Headless engine keeping its store in memory.
///
/// Used by the CLI when no rendering surface exists and by tests to observe
/// exactly which commands the controller issued.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    settings: Option<EngineSettings>,
    boot_failure: Option<String>,
    destroyed: bool,
    task: Option<TaskId>,
    annotations: Vec<EngineAnnotation>,
    predictions: Vec<Prediction>,
    selected: Option<LocalAnnotationId>,
    is_loading: bool,
    no_task: bool,
    flag_log: Vec<EngineFlags>,
    autosave_paused: HashSet<LocalAnnotationId>,
    resets: usize,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose boot always fails with `reason`.
    pub fn failing_boot(reason: impl Into<String>) -> Self {
        Self {
            boot_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn settings(&self) -> Option<&EngineSettings> {
        self.settings.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn no_task(&self) -> bool {
        self.no_task
    }

    /// Every flag update received, in order.
    pub fn flag_log(&self) -> &[EngineFlags] {
        &self.flag_log
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task
    }

    pub fn reset_count(&self) -> usize {
        self.resets
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_autosave_paused(&self, id: &LocalAnnotationId) -> bool {
        self.autosave_paused.contains(id)
    }

    /// Simulates the user editing an annotation: both the live content and
    /// the pending draft version change.
    pub fn edit(&mut self, id: &LocalAnnotationId, result: Value) -> Result<(), EngineError> {
        let annotation = self.get_mut(id)?;
        annotation.result = result.clone();
        annotation.draft_version = Some(result);
        Ok(())
    }

    fn get_mut(&mut self, id: &LocalAnnotationId) -> Result<&mut EngineAnnotation, EngineError> {
        self.annotations
            .iter_mut()
            .find(|annotation| &annotation.id == id)
            .ok_or_else(|| EngineError::UnknownAnnotation(id.clone()))
    }

    fn push_front(&mut self, annotation: EngineAnnotation) -> LocalAnnotationId {
        let id = annotation.id.clone();
        self.annotations.insert(0, annotation);
        id
    }

    fn from_server(annotation: &Annotation) -> EngineAnnotation {
        let id = annotation
            .pk
            .map(|pk| LocalAnnotationId(pk.to_string()))
            .unwrap_or_else(LocalAnnotationId::generate);
        EngineAnnotation {
            id,
            pk: annotation.pk,
            user_generate: annotation.user_generate,
            sent_user_generate: annotation.sent_user_generate,
            draft_id: annotation.draft_id,
            parent_prediction: annotation.parent_prediction,
            parent_annotation: annotation.parent_annotation,
            ground_truth: annotation.ground_truth,
            was_cancelled: annotation.was_cancelled,
            created_by: annotation.created_username.clone(),
            created_ago: annotation.created_ago.clone(),
            created_date: annotation.created_at,
            loaded_at: Utc::now(),
            result: annotation.result.clone(),
            draft_version: None,
            history_frozen: false,
        }
    }

    fn blank(options: NewAnnotation) -> EngineAnnotation {
        EngineAnnotation {
            id: LocalAnnotationId::generate(),
            pk: None,
            user_generate: options.user_generate,
            sent_user_generate: false,
            draft_id: None,
            parent_prediction: None,
            parent_annotation: None,
            ground_truth: false,
            was_cancelled: false,
            created_by: options.created_by,
            created_ago: options.created_ago,
            created_date: options.created_date,
            loaded_at: Utc::now(),
            result: options.draft.clone().unwrap_or(Value::Array(Vec::new())),
            draft_version: options.draft,
            history_frozen: false,
        }
    }
}

fn is_read_only(region: &Value) -> bool {
    region
        .get("readonly")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl LabelingEngine for InMemoryEngine {
    fn boot(&mut self, settings: &EngineSettings) -> anyhow::Result<()> {
        if let Some(reason) = &self.boot_failure {
            return Err(EngineError::Boot(reason.clone()).into());
        }
        self.settings = Some(settings.clone());
        if let Some(task) = settings.task.clone() {
            self.initialize_store(task);
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.resets += 1;
        self.task = None;
        self.annotations.clear();
        self.predictions.clear();
        self.selected = None;
        self.autosave_paused.clear();
    }

    fn assign_task(&mut self, task: &Task) {
        self.task = Some(task.id);
    }

    fn initialize_store(&mut self, task: EngineTask) {
        self.task = Some(task.id);
        self.annotations.clear();
        self.selected = None;
        for annotation in &task.annotations {
            let annotation = Self::from_server(annotation);
            self.push_front(annotation);
        }
        self.predictions = task.predictions;
        debug!(
            task_id = task.id.0,
            annotations = self.annotations.len(),
            predictions = self.predictions.len(),
            "engine: store initialized"
        );
    }

    fn set_flags(&mut self, flags: EngineFlags) {
        if let Some(is_loading) = flags.is_loading {
            self.is_loading = is_loading;
        }
        if let Some(no_task) = flags.no_task {
            self.no_task = no_task;
        }
        self.flag_log.push(flags);
    }

    fn annotations(&self) -> &[EngineAnnotation] {
        &self.annotations
    }

    fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    fn selected(&self) -> Option<&EngineAnnotation> {
        let selected = self.selected.as_ref()?;
        self.annotation(selected)
    }

    fn select_annotation(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError> {
        if self.annotation(id).is_none() {
            return Err(EngineError::UnknownAnnotation(id.clone()));
        }
        self.selected = Some(id.clone());
        Ok(())
    }

    fn add_annotation(&mut self, options: NewAnnotation) -> LocalAnnotationId {
        let annotation = Self::blank(options);
        self.push_front(annotation)
    }

    fn add_annotation_from_prediction(&mut self, prediction: &Prediction) -> LocalAnnotationId {
        let mut annotation = Self::blank(NewAnnotation::user_generated());
        annotation.parent_prediction = Some(prediction.id);
        annotation.result = prediction.result.clone();
        self.push_front(annotation)
    }

    fn remove_annotation(&mut self, id: &LocalAnnotationId) {
        self.annotations.retain(|annotation| &annotation.id != id);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
    }

    fn freeze_history(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError> {
        self.get_mut(id)?.history_frozen = true;
        Ok(())
    }

    fn unfreeze_history(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError> {
        self.get_mut(id)?.history_frozen = false;
        Ok(())
    }

    fn add_draft_version(
        &mut self,
        id: &LocalAnnotationId,
        draft: Value,
    ) -> Result<(), EngineError> {
        self.get_mut(id)?.draft_version = Some(draft);
        Ok(())
    }

    fn delete_all_regions(
        &mut self,
        id: &LocalAnnotationId,
        delete_read_only: bool,
    ) -> Result<(), EngineError> {
        let annotation = self.get_mut(id)?;
        let kept = match &annotation.result {
            Value::Array(regions) if !delete_read_only => regions
                .iter()
                .filter(|region| is_read_only(region))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        annotation.result = Value::Array(kept);
        Ok(())
    }

    fn deserialize_results(
        &mut self,
        id: &LocalAnnotationId,
        result: &Value,
    ) -> Result<(), EngineError> {
        self.get_mut(id)?.result = result.clone();
        Ok(())
    }

    fn set_draft_id(
        &mut self,
        id: &LocalAnnotationId,
        draft_id: Option<DraftId>,
    ) -> Result<(), EngineError> {
        self.get_mut(id)?.draft_id = draft_id;
        Ok(())
    }

    fn update_personal_key(
        &mut self,
        id: &LocalAnnotationId,
        pk: AnnotationId,
    ) -> Result<(), EngineError> {
        let annotation = self.get_mut(id)?;
        annotation.pk = Some(pk);
        if annotation.user_generate {
            annotation.sent_user_generate = true;
        }
        Ok(())
    }

    fn serialize_annotation(&self, id: &LocalAnnotationId) -> Result<Value, EngineError> {
        self.annotation(id)
            .map(|annotation| annotation.result.clone())
            .ok_or_else(|| EngineError::UnknownAnnotation(id.clone()))
    }

    fn pause_autosave(&mut self, id: &LocalAnnotationId) -> Result<(), EngineError> {
        if self.annotation(id).is_none() {
            return Err(EngineError::UnknownAnnotation(id.clone()));
        }
        self.autosave_paused.insert(id.clone());
        Ok(())
    }

    fn destroy(&mut self) {
        self.reset_state();
        self.destroyed = true;
    }
}

use std::{future::Future, sync::Arc};

use anyhow::Result;
use engine_integration::{
    EngineAnnotation, EngineFlags, EngineHook, EngineTask, LabelingEngine, LocalAnnotationId,
    NewAnnotation,
};
use serde_json::{json, Value};
use shared::{
    domain::{AnnotationId, DraftId, ReviewOutcome, TaskId},
    protocol::{Annotation, DetachDraftBody, Task},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::SessionError,
    events::{EventRegistry, HostEvent},
    gateway::{response_id, Endpoint, RemoteGateway, RequestParams},
    mode::{
        AnnotationRef, ModeKind, NavigationPolicy, SelectionContext, SelectionDecision,
        SessionMode,
    },
    options::SessionOptions,
    serialize::{prepare_data, SerializeOptions},
    task_store::TaskSource,
};

/// How the current annotation leaves the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAction {
    Submit,
    Skip,
    Accept { is_dirty: bool },
    Reject { comment: Option<String> },
}

impl SubmitAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit_annotation",
            Self::Skip => "skip_task",
            Self::Accept { .. } => "accept_annotation",
            Self::Reject { .. } => "reject_annotation",
        }
    }

    fn includes_id(&self) -> bool {
        !matches!(self, Self::Submit)
    }

    fn event(&self, annotation: Annotation, response: Value) -> HostEvent {
        match self {
            Self::Submit => HostEvent::SubmitAnnotation {
                annotation,
                response,
            },
            Self::Skip => HostEvent::SkipTask {
                annotation,
                response,
            },
            Self::Accept { is_dirty } => HostEvent::AcceptAnnotation {
                annotation,
                outcome: ReviewOutcome::for_accept(*is_dirty),
                response,
            },
            Self::Reject { .. } => HostEvent::RejectAnnotation {
                annotation,
                response,
            },
        }
    }
}

/// Read-only view of the session handed across the command queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub task_id: Option<TaskId>,
    pub selected: Option<EngineAnnotation>,
    pub annotations: Vec<EngineAnnotation>,
    pub is_loading: bool,
}

fn precondition(operation: &str, message: impl Into<String>) -> anyhow::Error {
    let message = message.into();
    warn!(operation, %message, "session: precondition failed");
    SessionError::Precondition(message).into()
}

/// Drives one embedded engine through task loading, draft reconciliation and
/// the submit/review lifecycle.
pub struct SessionController<E: LabelingEngine> {
    engine: E,
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn TaskSource>,
    events: Arc<EventRegistry>,
    mode: SessionMode,
    show_collab_predictions: bool,
    interactive_preannotations: bool,
    initial_annotation: Option<AnnotationId>,
    task: Option<Task>,
    engine_ready: bool,
    loading: bool,
}

impl<E: LabelingEngine> SessionController<E> {
    pub fn new(
        mut engine: E,
        options: SessionOptions,
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn TaskSource>,
    ) -> Result<Self, SessionError> {
        let settings = options.engine_settings();
        if let Err(err) = engine.boot(&settings) {
            error!(
                settings = ?settings,
                error = %err,
                "session: labeling engine failed to initialize"
            );
            return Err(SessionError::EngineInit(err.to_string()));
        }
        info!(
            project_id = options.project.id.0,
            mode = ?options.mode.kind,
            review = options.mode.review,
            interfaces = settings.interfaces.len(),
            "session: engine booted"
        );

        Ok(Self {
            engine,
            gateway,
            store,
            events: Arc::new(EventRegistry::new()),
            mode: options.mode,
            show_collab_predictions: options.project.show_collab_predictions,
            interactive_preannotations: options.interactive_preannotations,
            initial_annotation: options.annotation,
            task: options.task,
            engine_ready: false,
            loading: false,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn events(&self) -> Arc<EventRegistry> {
        Arc::clone(&self.events)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_ready(&self) -> bool {
        self.engine_ready
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            task_id: self.task.as_ref().map(|task| task.id),
            selected: self.engine.selected().cloned(),
            annotations: self.engine.annotations().to_vec(),
            is_loading: self.loading,
        }
    }

    fn ensure_ready(&self, operation: &str) -> Result<(), SessionError> {
        if self.engine_ready {
            Ok(())
        } else {
            warn!(operation, "session: engine has not reported load yet");
            Err(SessionError::EngineNotReady)
        }
    }

    fn held_task_id(&self, operation: &str) -> Result<TaskId> {
        match &self.task {
            Some(task) => Ok(task.id),
            None => {
                warn!(operation, "session: no task held");
                Err(SessionError::NoTask.into())
            }
        }
    }

    fn set_loading(&mut self, is_loading: bool) {
        self.loading = is_loading;
        self.engine.set_flags(EngineFlags::loading(is_loading));
    }

    /// Keeps the busy flag raised while `work` runs and clears it whether
    /// `work` succeeds or fails. A panic inside `work` leaves the flag set.
    async fn within_loading<T, F>(&mut self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.set_loading(true);
        let result = work.await;
        self.set_loading(false);
        result
    }

    async fn call(
        &mut self,
        endpoint: Endpoint,
        params: RequestParams,
        body: Option<Value>,
    ) -> Result<Value> {
        let gateway = Arc::clone(&self.gateway);
        self.within_loading(async move { gateway.call(endpoint, params, body).await })
            .await
    }

    fn annotation_snapshot(&self, id: &LocalAnnotationId) -> Option<Annotation> {
        self.engine.annotation(id).map(EngineAnnotation::to_server)
    }

    pub async fn handle_hook(&mut self, hook: EngineHook) -> Result<()> {
        debug!(hook = hook.name(), "session: engine hook");
        match hook {
            EngineHook::Load => self.on_load().await,
            EngineHook::StorageInitialized => self.on_storage_initialized(),
            EngineHook::TaskLoad => {
                self.ensure_ready("task_load")?;
                let task_id = self.task.as_ref().map(|task| task.id);
                self.events.invoke(HostEvent::TaskLoad { task_id });
                Ok(())
            }
            EngineHook::SubmitDraft { annotation } => self.on_submit_draft(&annotation).await,
            EngineHook::SubmitAnnotation => {
                self.submit_current_annotation(SubmitAction::Submit).await
            }
            EngineHook::UpdateAnnotation { annotation } => {
                self.on_update_annotation(&annotation).await
            }
            EngineHook::DeleteAnnotation { annotation } => {
                self.on_delete_annotation(annotation).await
            }
            EngineHook::AcceptAnnotation { is_dirty } => {
                self.submit_current_annotation(SubmitAction::Accept { is_dirty })
                    .await
            }
            EngineHook::RejectAnnotation { comment } => {
                self.submit_current_annotation(SubmitAction::Reject { comment })
                    .await
            }
            EngineHook::SkipTask => self.submit_current_annotation(SubmitAction::Skip).await,
            EngineHook::CancelSkippingTask => self.on_cancel_skipping_task().await,
            EngineHook::EntityCreate { region } => {
                self.ensure_ready("entity_create")?;
                self.events.invoke(HostEvent::EntityCreate { region });
                Ok(())
            }
            EngineHook::EntityDelete { region } => {
                self.ensure_ready("entity_delete")?;
                self.events.invoke(HostEvent::EntityDelete { region });
                Ok(())
            }
            EngineHook::SelectAnnotation { annotation } => {
                self.ensure_ready("select_annotation")?;
                self.events
                    .invoke(HostEvent::SelectAnnotation { local_id: annotation });
                Ok(())
            }
            EngineHook::NextTask { task, annotation } => {
                self.ensure_ready("next_task")?;
                self.events.invoke(HostEvent::NextTask {
                    task_id: task,
                    annotation_id: annotation,
                });
                self.load_task(task, annotation.map(AnnotationRef::Pk), true)
                    .await
            }
            EngineHook::PrevTask { task, annotation } => {
                self.ensure_ready("prev_task")?;
                self.events.invoke(HostEvent::PrevTask {
                    task_id: task,
                    annotation_id: annotation,
                });
                self.load_task(task, annotation.map(AnnotationRef::Pk), true)
                    .await
            }
        }
    }

    pub async fn on_load(&mut self) -> Result<()> {
        self.engine_ready = true;
        info!(mode = ?self.mode.kind, "session: engine loaded");
        self.events.invoke(HostEvent::LabelStudioLoad);
        if self.mode.is_label_stream() {
            self.load_task(None, None, false).await?;
        }
        Ok(())
    }

    pub fn on_storage_initialized(&mut self) -> Result<()> {
        self.ensure_ready("storage_initialized")?;
        self.events.invoke(HostEvent::StorageInitialized);

        if self.mode.kind != ModeKind::Explorer {
            return Ok(());
        }
        let Some(task) = &self.task else {
            return Ok(());
        };
        let requested = self
            .initial_annotation
            .or_else(|| task.last_annotation().and_then(|annotation| annotation.pk))
            .map(AnnotationRef::Pk)
            .unwrap_or(AnnotationRef::Auto);
        self.set_annotation(Some(requested), false)
    }

    /// Fetches a task (the next one in the stream when `task_id` is `None`)
    /// and shows it.
    pub async fn load_task(
        &mut self,
        task_id: Option<TaskId>,
        annotation: Option<AnnotationRef>,
        from_history: bool,
    ) -> Result<()> {
        self.ensure_ready("load_task")?;

        let store = Arc::clone(&self.store);
        let review = self.mode.review;
        let fetched = self
            .within_loading(async move {
                match task_id {
                    Some(task_id) => store.load_task(task_id).await,
                    None => store.load_next_task(review).await,
                }
            })
            .await?;

        let Some(task) = fetched else {
            if self.mode.is_label_stream() {
                info!(review, "session: no task available");
                self.engine.set_flags(EngineFlags::no_task(true));
            } else {
                warn!(task_id = ?task_id.map(|id| id.0), "session: task not found");
            }
            return Ok(());
        };

        self.engine.set_flags(EngineFlags::no_task(false));
        self.select_task(task, annotation, from_history)
    }

    /// Replaces the held task and pushes it into the engine. Unsaved work on
    /// the same task survives through the store's merge.
    pub fn select_task(
        &mut self,
        mut task: Task,
        annotation: Option<AnnotationRef>,
        from_history: bool,
    ) -> Result<()> {
        self.ensure_ready("select_task")?;

        if self.task.as_ref().is_some_and(|held| held.id == task.id) {
            let held: Vec<Annotation> = self
                .engine
                .annotations()
                .iter()
                .map(EngineAnnotation::to_server)
                .collect();
            let carried = self.store.merge_annotations(&mut task, held);
            debug!(task_id = task.id.0, carried, "session: merged held annotations");
        }

        self.engine.reset_state();
        self.engine.assign_task(&task);
        self.engine.initialize_store(EngineTask::from_task(&task));
        info!(
            task_id = task.id.0,
            annotations = task.annotations.len(),
            predictions = task.predictions.len(),
            drafts = task.drafts.len(),
            "session: task selected"
        );
        self.task = Some(task);

        self.set_annotation(annotation, from_history)
    }

    /// Applies pending drafts (outside review) and activates the annotation
    /// the mode's policy picks.
    pub fn set_annotation(
        &mut self,
        requested: Option<AnnotationRef>,
        from_history: bool,
    ) -> Result<()> {
        if self.task.is_none() {
            return Err(SessionError::NoTask.into());
        }
        self.reconcile_drafts()?;

        let requested = match (self.mode.kind, requested) {
            (ModeKind::Explorer, None) => Some(AnnotationRef::Auto),
            (_, requested) => requested,
        };

        let decision = self.mode.selection_policy().choose(&SelectionContext {
            annotations: self.engine.annotations(),
            predictions: self.engine.predictions(),
            requested: requested.as_ref(),
            from_history,
            show_collab_predictions: self.show_collab_predictions,
            interactive_preannotations: self.interactive_preannotations,
        });
        debug!(?decision, ?requested, from_history, "session: annotation selection");

        let chosen = match decision {
            SelectionDecision::Existing(id) => Some(id),
            SelectionDecision::FromTopPrediction => {
                let top = self.engine.predictions().first().cloned();
                top.map(|prediction| self.engine.add_annotation_from_prediction(&prediction))
            }
            SelectionDecision::NewEmpty => {
                Some(self.engine.add_annotation(NewAnnotation::user_generated()))
            }
            SelectionDecision::Nothing => None,
        };

        match chosen {
            Some(id) => self.activate(&id),
            None => {
                debug!("session: nothing to select");
                Ok(())
            }
        }
    }

    fn activate(&mut self, id: &LocalAnnotationId) -> Result<()> {
        self.engine.select_annotation(id)?;
        if let Some(annotation) = self.annotation_snapshot(id) {
            self.events.invoke(HostEvent::AnnotationSet {
                local_id: id.clone(),
                annotation,
            });
        }
        Ok(())
    }

    /// Overlays the held task's drafts onto the engine store. Drafts already
    /// stamped on an engine annotation are skipped. Returns how many drafts
    /// were applied.
    pub fn reconcile_drafts(&mut self) -> Result<usize> {
        if !self.mode.applies_drafts() {
            return Ok(0);
        }
        let Some(task) = &self.task else {
            return Ok(0);
        };
        let task_id = task.id;
        let drafts = task.drafts.clone();

        let mut applied = 0;
        for draft in drafts {
            let active = self
                .engine
                .annotations()
                .iter()
                .any(|annotation| annotation.draft_id == Some(draft.id));
            if active {
                continue;
            }

            let id = match draft.annotation {
                Some(pk) => {
                    let Some(existing) = self.engine.annotation_by_pk(pk).map(|a| a.id.clone())
                    else {
                        error!(
                            task_id = task_id.0,
                            draft_id = draft.id.0,
                            annotation = pk.0,
                            "session: draft references an annotation the engine does not hold"
                        );
                        continue;
                    };
                    self.engine.freeze_history(&existing)?;
                    self.engine.add_draft_version(&existing, draft.result.clone())?;
                    self.engine.delete_all_regions(&existing, true)?;
                    existing
                }
                None => self.engine.add_annotation(NewAnnotation {
                    draft: Some(draft.result.clone()),
                    user_generate: true,
                    created_by: draft.created_username.clone(),
                    created_ago: draft.created_ago.clone(),
                    created_date: draft.created_at,
                }),
            };

            self.engine.select_annotation(&id)?;
            self.engine.deserialize_results(&id, &draft.result)?;
            self.engine.set_draft_id(&id, Some(draft.id))?;
            self.engine.unfreeze_history(&id)?;
            applied += 1;
            debug!(task_id = task_id.0, draft_id = draft.id.0, annotation = %id, "session: draft applied");
        }
        Ok(applied)
    }

    /// Sends the selected annotation and moves on according to the mode.
    pub async fn submit_current_annotation(&mut self, action: SubmitAction) -> Result<()> {
        let operation = action.name();
        self.ensure_ready(operation)?;
        let task_id = self.held_task_id(operation)?;
        let Some(current) = self.engine.selected().map(|annotation| annotation.id.clone()) else {
            return Err(precondition(operation, "no annotation is selected"));
        };

        let options = if action.includes_id() {
            SerializeOptions::with_id()
        } else {
            SerializeOptions::default()
        };
        let mut payload = prepare_data(&self.engine, &current, options)?;
        let id = payload.take_id();

        let (endpoint, params) = match (&action, id) {
            (SubmitAction::Submit, _) | (SubmitAction::Skip, None) => {
                (Endpoint::SubmitAnnotation, RequestParams::task(task_id))
            }
            (SubmitAction::Skip, Some(pk)) => (
                Endpoint::UpdateAnnotation,
                RequestParams::annotation(task_id, pk),
            ),
            (SubmitAction::Accept { is_dirty }, Some(pk)) => (
                Endpoint::UpdateAnnotation,
                RequestParams::annotation(task_id, pk)
                    .with_query("review", ReviewOutcome::for_accept(*is_dirty).as_str()),
            ),
            (SubmitAction::Reject { comment }, Some(pk)) => (
                Endpoint::UpdateAnnotation,
                RequestParams::annotation(task_id, pk)
                    .with_query("review", ReviewOutcome::Reject.as_str())
                    .with_query("review_text", comment.clone().unwrap_or_default()),
            ),
            (SubmitAction::Accept { .. } | SubmitAction::Reject { .. }, None) => {
                return Err(precondition(
                    operation,
                    "only a saved annotation can be reviewed",
                ));
            }
        };

        match action {
            SubmitAction::Skip => payload.was_cancelled = true,
            SubmitAction::Reject { .. } => {
                payload.result = json!([]);
                payload.lead_time = None;
            }
            _ => {}
        }
        let body = serde_json::to_value(&payload)?;

        info!(task_id = task_id.0, operation, endpoint = endpoint.name(), "session: submitting");
        let response = self.call(endpoint, params, Some(body)).await?;

        if let Some(pk) = response_id(&response) {
            self.engine.update_personal_key(&current, AnnotationId(pk))?;
            if let Some(annotation) = self.annotation_snapshot(&current) {
                self.events.invoke(action.event(annotation, response));
            }
        }

        match self.mode.navigation() {
            NavigationPolicy::ReloadCurrent => {
                let pk = self.engine.annotation(&current).and_then(|a| a.pk);
                self.load_task(Some(task_id), pk.map(AnnotationRef::Pk), true)
                    .await
            }
            NavigationPolicy::AdvanceStream => self.load_task(None, None, false).await,
        }
    }

    pub async fn on_update_annotation(&mut self, id: &LocalAnnotationId) -> Result<()> {
        let operation = "update_annotation";
        self.ensure_ready(operation)?;
        let task_id = self.held_task_id(operation)?;
        let Some(pk) = self
            .engine
            .annotation(id)
            .filter(|annotation| annotation.is_persisted())
            .and_then(|annotation| annotation.pk)
        else {
            return Err(precondition(operation, format!("annotation {id} has no server key")));
        };

        let payload = prepare_data(&self.engine, id, SerializeOptions::default())?;
        let body = serde_json::to_value(&payload)?;
        let response = self
            .call(
                Endpoint::UpdateAnnotation,
                RequestParams::annotation(task_id, pk),
                Some(body),
            )
            .await?;

        if let Some(annotation) = self.annotation_snapshot(id) {
            self.events.invoke(HostEvent::UpdateAnnotation {
                annotation,
                response,
            });
        }
        self.load_task(Some(task_id), Some(AnnotationRef::Pk(pk)), true)
            .await
    }

    /// Deletes remotely, then falls back to the last remaining annotation.
    /// Never-sent annotations only have their draft deleted.
    pub async fn on_delete_annotation(&mut self, annotation: EngineAnnotation) -> Result<()> {
        let operation = "delete_annotation";
        self.ensure_ready(operation)?;
        let task_id = self.held_task_id(operation)?;

        if annotation.is_unsent() {
            if let Some(draft_id) = annotation.draft_id {
                self.delete_draft(draft_id).await?;
            }
        } else {
            let Some(pk) = annotation.pk else {
                return Err(precondition(operation, "annotation has no server key"));
            };
            self.call(
                Endpoint::DeleteAnnotation,
                RequestParams::annotation(task_id, pk),
                None,
            )
            .await?;
            info!(task_id = task_id.0, annotation = pk.0, "session: annotation deleted");
            self.events.invoke(HostEvent::DeleteAnnotation {
                annotation: annotation.to_server(),
            });
        }

        self.engine.remove_annotation(&annotation.id);
        let fallback = self
            .engine
            .annotations()
            .last()
            .map(|remaining| remaining.id.clone());
        match fallback {
            Some(id) => self.activate(&id),
            None => {
                debug!(task_id = task_id.0, "session: no annotation left to select");
                Ok(())
            }
        }
    }

    pub async fn delete_draft(&mut self, draft_id: DraftId) -> Result<Value> {
        self.ensure_ready("delete_draft")?;
        let response = self
            .gateway
            .call(Endpoint::DeleteDraft, RequestParams::draft(draft_id), None)
            .await?;
        if let Some(task) = self.task.as_mut() {
            task.remove_draft(draft_id);
        }
        debug!(draft_id = draft_id.0, "session: draft deleted");
        Ok(response)
    }

    /// Autosave path: stores pending edits as a draft without raising the
    /// busy flag.
    pub async fn on_submit_draft(&mut self, id: &LocalAnnotationId) -> Result<()> {
        let operation = "submit_draft";
        self.ensure_ready(operation)?;
        let task_id = self.held_task_id(operation)?;
        let Some(annotation) = self.engine.annotation(id).cloned() else {
            return Err(precondition(operation, format!("annotation {id} is not in the engine")));
        };

        let payload = prepare_data(&self.engine, id, SerializeOptions::draft())?;
        let body = serde_json::to_value(&payload)?;

        let gateway = Arc::clone(&self.gateway);
        if let Some(draft_id) = annotation.draft_id {
            gateway
                .call(Endpoint::UpdateDraft, RequestParams::draft(draft_id), Some(body))
                .await?;
            self.events.invoke(HostEvent::SubmitDraft {
                local_id: id.clone(),
                draft_id,
            });
            return Ok(());
        }

        let (endpoint, params) = match annotation.pk.filter(|_| annotation.is_persisted()) {
            Some(pk) => (
                Endpoint::CreateDraftForAnnotation,
                RequestParams::annotation(task_id, pk),
            ),
            None => (Endpoint::CreateDraftForTask, RequestParams::task(task_id)),
        };
        let response = gateway.call(endpoint, params, Some(body)).await?;

        if let Some(draft_id) = response_id(&response).map(DraftId) {
            self.engine.set_draft_id(id, Some(draft_id))?;
            debug!(task_id = task_id.0, draft_id = draft_id.0, "session: draft created");
            self.events.invoke(HostEvent::SubmitDraft {
                local_id: id.clone(),
                draft_id,
            });
        }
        Ok(())
    }

    /// Turns a skipped annotation back into a draft and deletes it.
    pub async fn on_cancel_skipping_task(&mut self) -> Result<()> {
        let operation = "cancel_skipping_task";
        self.ensure_ready(operation)?;
        let task_id = self.held_task_id(operation)?;
        let Some((current, pk)) = self
            .engine
            .selected()
            .filter(|annotation| annotation.is_persisted())
            .and_then(|annotation| annotation.pk.map(|pk| (annotation.clone(), pk)))
        else {
            return Err(precondition(
                operation,
                "a saved annotation must be selected to cancel a skip",
            ));
        };

        self.engine.pause_autosave(&current.id)?;
        let (draft_endpoint, draft_params, draft_body) = match current.draft_id {
            Some(draft_id) => (
                Endpoint::UpdateDraft,
                RequestParams::draft(draft_id),
                serde_json::to_value(DetachDraftBody::default())?,
            ),
            None => {
                let payload = prepare_data(&self.engine, &current.id, SerializeOptions::default())?;
                (
                    Endpoint::CreateDraftForTask,
                    RequestParams::task(task_id),
                    serde_json::to_value(&payload)?,
                )
            }
        };

        let gateway = Arc::clone(&self.gateway);
        self.within_loading(async move {
            gateway
                .call(draft_endpoint, draft_params, Some(draft_body))
                .await?;
            gateway
                .call(
                    Endpoint::DeleteAnnotation,
                    RequestParams::annotation(task_id, pk),
                    None,
                )
                .await
        })
        .await?;
        info!(task_id = task_id.0, annotation = pk.0, "session: skip cancelled");

        self.load_task(Some(task_id), None, false).await?;
        self.events.invoke(HostEvent::CancelSkippingTask);
        Ok(())
    }

    /// Host-driven task switch while browsing. A task already held is left
    /// alone, and the call does nothing in stream modes.
    pub fn start_labeling(&mut self, task: Task, annotation: Option<AnnotationId>) -> Result<()> {
        let operation = "start_labeling";
        self.ensure_ready(operation)?;
        if self.mode.kind != ModeKind::Explorer {
            debug!(mode = ?self.mode.kind, "session: start labeling ignored outside explorer");
            return Ok(());
        }
        if self.task.as_ref().is_some_and(|held| held.id == task.id) {
            debug!(task_id = task.id.0, "session: task already open");
            return Ok(());
        }

        let requested = annotation
            .or_else(|| task.last_annotation().and_then(|last| last.pk))
            .map(AnnotationRef::Pk);
        self.select_task(task, requested, false)
    }

    /// Tears the engine down and hands it back.
    pub fn destroy(mut self) -> E {
        self.engine.destroy();
        self.events.remove_all_listeners();
        info!("session: destroyed");
        self.engine
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;

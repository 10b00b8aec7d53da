//! Notifications the session publishes to its host application.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use engine_integration::LocalAnnotationId;
use serde_json::Value;
use shared::{
    domain::{AnnotationId, DraftId, ReviewOutcome, TaskId},
    protocol::Annotation,
};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    LabelStudioLoad,
    StorageInitialized,
    TaskLoad {
        task_id: Option<TaskId>,
    },
    AnnotationSet {
        local_id: LocalAnnotationId,
        annotation: Annotation,
    },
    SubmitAnnotation {
        annotation: Annotation,
        response: Value,
    },
    UpdateAnnotation {
        annotation: Annotation,
        response: Value,
    },
    DeleteAnnotation {
        annotation: Annotation,
    },
    SubmitDraft {
        local_id: LocalAnnotationId,
        draft_id: DraftId,
    },
    SkipTask {
        annotation: Annotation,
        response: Value,
    },
    CancelSkippingTask,
    AcceptAnnotation {
        annotation: Annotation,
        outcome: ReviewOutcome,
        response: Value,
    },
    RejectAnnotation {
        annotation: Annotation,
        response: Value,
    },
    EntityCreate {
        region: Value,
    },
    EntityDelete {
        region: Value,
    },
    SelectAnnotation {
        local_id: LocalAnnotationId,
    },
    NextTask {
        task_id: Option<TaskId>,
        annotation_id: Option<AnnotationId>,
    },
    PrevTask {
        task_id: Option<TaskId>,
        annotation_id: Option<AnnotationId>,
    },
    Error {
        operation: String,
        message: String,
    },
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LabelStudioLoad => "labelStudioLoad",
            Self::StorageInitialized => "storageInitialized",
            Self::TaskLoad { .. } => "taskLoad",
            Self::AnnotationSet { .. } => "annotationSet",
            Self::SubmitAnnotation { .. } => "submitAnnotation",
            Self::UpdateAnnotation { .. } => "updateAnnotation",
            Self::DeleteAnnotation { .. } => "deleteAnnotation",
            Self::SubmitDraft { .. } => "submitDraft",
            Self::SkipTask { .. } => "skipTask",
            Self::CancelSkippingTask => "cancelSkippingTask",
            Self::AcceptAnnotation { .. } => "acceptAnnotation",
            Self::RejectAnnotation { .. } => "rejectAnnotation",
            Self::EntityCreate { .. } => "entityCreate",
            Self::EntityDelete { .. } => "entityDelete",
            Self::SelectAnnotation { .. } => "selectAnnotation",
            Self::NextTask { .. } => "nextTask",
            Self::PrevTask { .. } => "prevTask",
            Self::Error { .. } => "error",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&HostEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Named-event registry plus a broadcast feed of every event.
pub struct EventRegistry {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<HostEvent>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<String, Vec<(SubscriptionId, EventHandler)>>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers()
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one handler, or every handler for `name` when `id` is `None`.
    pub fn off(&self, name: &str, id: Option<SubscriptionId>) {
        let mut handlers = self.handlers();
        match id {
            Some(id) => {
                if let Some(list) = handlers.get_mut(name) {
                    list.retain(|(existing, _)| *existing != id);
                }
            }
            None => {
                handlers.remove(name);
            }
        }
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers()
            .get(name)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn remove_all_listeners(&self) {
        self.handlers().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn invoke(&self, event: HostEvent) {
        // handlers run outside the lock so they may subscribe or unsubscribe
        let callbacks: Vec<EventHandler> = self
            .handlers()
            .get(event.name())
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(&event);
        }
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;

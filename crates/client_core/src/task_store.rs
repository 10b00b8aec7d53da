use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::TaskId,
    protocol::{Annotation, Task},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::gateway::{Endpoint, GatewayError, RemoteGateway, RequestParams};

/// Source of tasks for a session, owning every persisted task it has seen.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// `Ok(None)` when the task does not exist.
    async fn load_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    /// `Ok(None)` when the queue has nothing left for this user.
    async fn load_next_task(&self, review: bool) -> Result<Option<Task>>;

    /// Folds annotations held in memory for the same task into a freshly
    /// fetched copy of it. Returns how many local annotations were carried.
    fn merge_annotations(&self, task: &mut Task, held: Vec<Annotation>) -> usize {
        merge_annotations(task, held)
    }
}

/// Server copies win for persisted annotations and stay unstamped, so the
/// task's drafts are overlaid onto them again. Persisted annotations the
/// server no longer lists are dropped. Never-sent annotations are appended so
/// that unsaved work survives the refresh.
pub fn merge_annotations(task: &mut Task, held: Vec<Annotation>) -> usize {
    let mut carried = 0;
    // held annotations arrive newest first; append oldest first
    for annotation in held.into_iter().rev() {
        match annotation.pk {
            Some(_) if annotation.is_persisted() => {}
            _ => {
                task.annotations.push(Annotation {
                    pk: None,
                    user_generate: true,
                    sent_user_generate: false,
                    ..annotation
                });
                carried += 1;
            }
        }
    }
    carried
}

/// Task store backed by the remote gateway.
pub struct TaskStore {
    gateway: Arc<dyn RemoteGateway>,
    tasks: Mutex<HashMap<TaskId, Task>>,
    selected: Mutex<Option<TaskId>>,
}

impl TaskStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            gateway,
            tasks: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
        }
    }

    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.lock().await.get(&task_id).cloned()
    }

    pub async fn selected(&self) -> Option<Task> {
        let selected = *self.selected.lock().await;
        match selected {
            Some(task_id) => self.task(task_id).await,
            None => None,
        }
    }

    async fn remember(&self, task: &Task) {
        self.tasks.lock().await.insert(task.id, task.clone());
        *self.selected.lock().await = Some(task.id);
    }
}

#[async_trait]
impl TaskSource for TaskStore {
    async fn load_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        let response = match self
            .gateway
            .call(Endpoint::Task, RequestParams::task(task_id), None)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err
                    .downcast_ref::<GatewayError>()
                    .is_some_and(GatewayError::is_not_found)
                {
                    info!(task_id = task_id.0, "store: task not found");
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let task: Task = serde_json::from_value(response)
            .with_context(|| format!("failed to decode task {}", task_id.0))?;
        self.remember(&task).await;
        debug!(
            task_id = task.id.0,
            annotations = task.annotations.len(),
            drafts = task.drafts.len(),
            "store: task loaded"
        );
        Ok(Some(task))
    }

    async fn load_next_task(&self, review: bool) -> Result<Option<Task>> {
        let mut params = RequestParams::default();
        if review {
            params = params.with_query("review", "true");
        }

        let response = match self.gateway.call(Endpoint::NextTask, params, None).await {
            Ok(response) => response,
            Err(err) => {
                if err
                    .downcast_ref::<GatewayError>()
                    .is_some_and(GatewayError::is_not_found)
                {
                    info!(review, "store: label stream is empty");
                    return Ok(None);
                }
                return Err(err);
            }
        };

        if response.get("id").map_or(true, |id| id.is_null()) {
            info!(review, "store: label stream is empty");
            return Ok(None);
        }

        let task: Task =
            serde_json::from_value(response).context("failed to decode next task")?;
        self.remember(&task).await;
        debug!(task_id = task.id.0, review, "store: next task loaded");
        Ok(Some(task))
    }
}

#[cfg(test)]
#[path = "tests/task_store_tests.rs"]
mod tests;

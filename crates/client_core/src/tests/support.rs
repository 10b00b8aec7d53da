use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::TaskId,
    error::{ApiError, ErrorCode},
    protocol::Task,
};
use tokio::sync::Mutex;

use crate::{
    gateway::{Endpoint, GatewayError, RemoteGateway, RequestParams},
    task_store::TaskSource,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub endpoint: Endpoint,
    pub params: RequestParams,
    pub body: Option<Value>,
}

enum Scripted {
    Respond(Value),
    Fail(String),
    Status(u16),
}

/// Gateway double: replies from a per-endpoint script, `{"ok": true}` when
/// nothing is scripted, and records every call.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    calls: Mutex<Vec<RecordedCall>>,
    script: Mutex<HashMap<Endpoint, VecDeque<Scripted>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, endpoint: Endpoint, reply: Scripted) {
        self.script
            .lock()
            .await
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    pub async fn respond(&self, endpoint: Endpoint, response: Value) {
        self.push(endpoint, Scripted::Respond(response)).await;
    }

    pub async fn fail(&self, endpoint: Endpoint, message: &str) {
        self.push(endpoint, Scripted::Fail(message.to_string()))
            .await;
    }

    pub async fn status(&self, endpoint: Endpoint, status: u16) {
        self.push(endpoint, Scripted::Status(status)).await;
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, endpoint: Endpoint) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn call(
        &self,
        endpoint: Endpoint,
        params: RequestParams,
        body: Option<Value>,
    ) -> Result<Value> {
        self.calls.lock().await.push(RecordedCall {
            endpoint,
            params,
            body,
        });

        let next = self
            .script
            .lock()
            .await
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            Some(Scripted::Status(status)) => Err(GatewayError::Status {
                endpoint: endpoint.name(),
                status,
                error: ApiError::new(ErrorCode::from_status(status), "scripted failure"),
            }
            .into()),
            None => Ok(json!({ "ok": true })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreRequest {
    Task(TaskId),
    Next { review: bool },
}

/// Task source double serving prepared task versions.
///
/// Each task id holds a queue of versions: every load pops the front one until
/// a single version is left, which is then served forever. This mimics the
/// server gaining annotations between reloads.
#[derive(Default)]
pub(crate) struct StaticTaskStore {
    tasks: Mutex<HashMap<TaskId, VecDeque<Task>>>,
    stream: Mutex<VecDeque<Task>>,
    failures: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<StoreRequest>>,
}

impl StaticTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, task: Task) {
        self.tasks
            .lock()
            .await
            .entry(task.id)
            .or_default()
            .push_back(task);
    }

    pub async fn queue_next(&self, task: Task) {
        self.stream.lock().await.push_back(task);
    }

    pub async fn fail_next(&self, message: &str) {
        self.failures.lock().await.push_back(message.to_string());
    }

    pub async fn requests(&self) -> Vec<StoreRequest> {
        self.requests.lock().await.clone()
    }

    async fn take_failure(&self) -> Option<String> {
        self.failures.lock().await.pop_front()
    }
}

#[async_trait]
impl TaskSource for StaticTaskStore {
    async fn load_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.requests.lock().await.push(StoreRequest::Task(task_id));
        if let Some(message) = self.take_failure().await {
            return Err(anyhow!(message));
        }

        let mut tasks = self.tasks.lock().await;
        let Some(versions) = tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if versions.len() > 1 {
            Ok(versions.pop_front())
        } else {
            Ok(versions.front().cloned())
        }
    }

    async fn load_next_task(&self, review: bool) -> Result<Option<Task>> {
        self.requests
            .lock()
            .await
            .push(StoreRequest::Next { review });
        if let Some(message) = self.take_failure().await {
            return Err(anyhow!(message));
        }
        Ok(self.stream.lock().await.pop_front())
    }
}

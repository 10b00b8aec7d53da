//! Single-consumer command queue in front of a [`SessionController`].
//!
//! Host requests and engine hooks are processed strictly one at a time, so a
//! transition never starts while another one is still awaiting the server.

use std::sync::Arc;

use anyhow::Result;
use engine_integration::{EngineHook, LabelingEngine};
use serde_json::Value;
use shared::{
    domain::{AnnotationId, DraftId, TaskId},
    protocol::Task,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    controller::{SessionController, SessionSnapshot},
    error::SessionError,
    events::{EventRegistry, HostEvent},
    mode::AnnotationRef,
};

type Reply<T> = oneshot::Sender<Result<T>>;

pub enum SessionCommand {
    Hook(EngineHook),
    LoadTask {
        task_id: Option<TaskId>,
        annotation: Option<AnnotationRef>,
        from_history: bool,
        reply: Reply<()>,
    },
    SelectTask {
        task: Task,
        annotation: Option<AnnotationRef>,
        from_history: bool,
        reply: Reply<()>,
    },
    StartLabeling {
        task: Task,
        annotation: Option<AnnotationId>,
        reply: Reply<()>,
    },
    DeleteDraft {
        draft_id: DraftId,
        reply: Reply<Value>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Hook(hook) => hook.name(),
            Self::LoadTask { .. } => "load_task",
            Self::SelectTask { .. } => "select_task",
            Self::StartLabeling { .. } => "start_labeling",
            Self::DeleteDraft { .. } => "delete_draft",
            Self::Snapshot { .. } => "snapshot",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Cloneable sender side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: Arc<EventRegistry>,
}

impl SessionHandle {
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::QueueClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| SessionError::QueueClosed)?
    }

    /// Queues an engine hook. Failures surface as `error` events.
    pub fn hook(&self, hook: EngineHook) -> Result<(), SessionError> {
        self.send(SessionCommand::Hook(hook))
    }

    pub async fn load_task(
        &self,
        task_id: Option<TaskId>,
        annotation: Option<AnnotationRef>,
        from_history: bool,
    ) -> Result<()> {
        self.request(|reply| SessionCommand::LoadTask {
            task_id,
            annotation,
            from_history,
            reply,
        })
        .await
    }

    pub async fn select_task(
        &self,
        task: Task,
        annotation: Option<AnnotationRef>,
        from_history: bool,
    ) -> Result<()> {
        self.request(|reply| SessionCommand::SelectTask {
            task,
            annotation,
            from_history,
            reply,
        })
        .await
    }

    pub async fn start_labeling(&self, task: Task, annotation: Option<AnnotationId>) -> Result<()> {
        self.request(|reply| SessionCommand::StartLabeling {
            task,
            annotation,
            reply,
        })
        .await
    }

    pub async fn delete_draft(&self, draft_id: DraftId) -> Result<Value> {
        self.request(|reply| SessionCommand::DeleteDraft { draft_id, reply })
            .await
    }

    /// Waits for every previously queued command, then reports the state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply })?;
        response.await.map_err(|_| SessionError::QueueClosed)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown)
    }
}

/// Moves the controller onto its own task. The join handle yields the
/// destroyed engine once the queue stops.
pub fn spawn_session<E>(controller: SessionController<E>) -> (SessionHandle, JoinHandle<E>)
where
    E: LabelingEngine + 'static,
{
    let (commands, receiver) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        commands,
        events: controller.events(),
    };
    let task = tokio::spawn(run_session(controller, receiver));
    (handle, task)
}

async fn run_session<E>(
    mut controller: SessionController<E>,
    mut receiver: mpsc::UnboundedReceiver<SessionCommand>,
) -> E
where
    E: LabelingEngine,
{
    while let Some(command) = receiver.recv().await {
        debug!(command = command.name(), "session: command");
        match command {
            SessionCommand::Hook(hook) => {
                let name = hook.name();
                if let Err(err) = controller.handle_hook(hook).await {
                    warn!(hook = name, error = %err, "session: hook failed");
                    controller.events().invoke(HostEvent::Error {
                        operation: name.to_string(),
                        message: err.to_string(),
                    });
                }
            }
            SessionCommand::LoadTask {
                task_id,
                annotation,
                from_history,
                reply,
            } => {
                let result = controller.load_task(task_id, annotation, from_history).await;
                let _ = reply.send(result);
            }
            SessionCommand::SelectTask {
                task,
                annotation,
                from_history,
                reply,
            } => {
                let result = controller.select_task(task, annotation, from_history);
                let _ = reply.send(result);
            }
            SessionCommand::StartLabeling {
                task,
                annotation,
                reply,
            } => {
                let result = controller.start_labeling(task, annotation);
                let _ = reply.send(result);
            }
            SessionCommand::DeleteDraft { draft_id, reply } => {
                let result = controller.delete_draft(draft_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(controller.snapshot());
            }
            SessionCommand::Shutdown => break,
        }
    }

    info!("session: queue stopped");
    controller.destroy()
}

#[cfg(test)]
#[path = "tests/queue_tests.rs"]
mod tests;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine refused to boot; the controller must be rebuilt.
    #[error("labeling engine failed to initialize: {0}")]
    EngineInit(String),
    #[error("labeling engine has not reported load yet")]
    EngineNotReady,
    #[error("no task is held by the session")]
    NoTask,
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("session queue is closed")]
    QueueClosed,
}

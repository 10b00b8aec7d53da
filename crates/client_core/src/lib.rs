//! Annotation session core: remote gateway, task store and the controller
//! that keeps an embedded labeling engine in step with both.

pub mod controller;
pub mod error;
pub mod events;
pub mod gateway;
pub mod mode;
pub mod options;
pub mod queue;
pub mod serialize;
pub mod task_store;

pub use controller::{SessionController, SessionSnapshot, SubmitAction};
pub use error::SessionError;
pub use events::{EventRegistry, HostEvent, SubscriptionId};
pub use gateway::{
    fetch_project, Endpoint, GatewayConfig, GatewayError, HttpGateway, RemoteGateway,
    RequestParams,
};
pub use mode::{AnnotationRef, ModeKind, SessionMode};
pub use options::{HostInterfaces, SessionOptions};
pub use queue::{spawn_session, SessionCommand, SessionHandle};
pub use task_store::{TaskSource, TaskStore};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

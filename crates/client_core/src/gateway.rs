use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use shared::{
    domain::{AnnotationId, DraftId, ProjectId, TaskId},
    error::{ApiError, ErrorCode},
    protocol::Project,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Named server operations the session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Project,
    Task,
    NextTask,
    SubmitAnnotation,
    UpdateAnnotation,
    DeleteAnnotation,
    TaskDrafts,
    CreateDraftForTask,
    CreateDraftForAnnotation,
    UpdateDraft,
    DeleteDraft,
}

impl Endpoint {
    pub fn name(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Task => "task",
            Self::NextTask => "nextTask",
            Self::SubmitAnnotation => "submitAnnotation",
            Self::UpdateAnnotation => "updateAnnotation",
            Self::DeleteAnnotation => "deleteAnnotation",
            Self::TaskDrafts => "taskDrafts",
            Self::CreateDraftForTask => "createDraftForTask",
            Self::CreateDraftForAnnotation => "createDraftForAnnotation",
            Self::UpdateDraft => "updateDraft",
            Self::DeleteDraft => "deleteDraft",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Self::Project | Self::Task | Self::NextTask | Self::TaskDrafts => Method::GET,
            Self::SubmitAnnotation | Self::CreateDraftForTask | Self::CreateDraftForAnnotation => {
                Method::POST
            }
            Self::UpdateAnnotation | Self::UpdateDraft => Method::PATCH,
            Self::DeleteAnnotation | Self::DeleteDraft => Method::DELETE,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Project => "/api/dm/project",
            Self::Task => "/api/tasks/:taskID",
            Self::NextTask => "/api/dm/tasks/next",
            Self::SubmitAnnotation => "/api/tasks/:taskID/annotations",
            Self::UpdateAnnotation | Self::DeleteAnnotation => "/api/annotations/:annotationID",
            Self::TaskDrafts | Self::CreateDraftForTask => "/api/tasks/:taskID/drafts",
            Self::CreateDraftForAnnotation => "/api/tasks/:taskID/annotations/:annotationID/drafts",
            Self::UpdateDraft | Self::DeleteDraft => "/api/drafts/:draftID",
        }
    }
}

/// Path parameters plus extra query parameters for one call.
///
/// Identifiers not consumed by the endpoint's path template are sent as
/// query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    pub task_id: Option<TaskId>,
    pub annotation_id: Option<AnnotationId>,
    pub draft_id: Option<DraftId>,
    pub query: Vec<(String, String)>,
}

impl RequestParams {
    pub fn task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }

    pub fn annotation(task_id: TaskId, annotation_id: AnnotationId) -> Self {
        Self {
            task_id: Some(task_id),
            annotation_id: Some(annotation_id),
            ..Self::default()
        }
    }

    pub fn draft(draft_id: DraftId) -> Self {
        Self {
            draft_id: Some(draft_id),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn placeholder(&self, name: &str) -> Option<String> {
        match name {
            "taskID" => self.task_id.map(|id| id.to_string()),
            "annotationID" => self.annotation_id.map(|id| id.to_string()),
            "draftID" => self.draft_id.map(|id| id.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{endpoint} requires path parameter {param}")]
    MissingParam {
        endpoint: &'static str,
        param: String,
    },
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[error("{endpoint} returned {status}: {}", .error.message)]
    Status {
        endpoint: &'static str,
        status: u16,
        error: ApiError,
    },
    #[error("{endpoint} returned an undecodable body: {source}")]
    Decode {
        endpoint: &'static str,
        source: serde_json::Error,
    },
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { error, .. } if error.code == ErrorCode::NotFound)
    }
}

/// Issues named operations against the labeling server.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn call(
        &self,
        endpoint: Endpoint,
        params: RequestParams,
        body: Option<Value>,
    ) -> Result<Value>;
}

/// Numeric `id` of a parsed response, if it carries one.
pub fn response_id(response: &Value) -> Option<i64> {
    match response.get("id")? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

pub async fn fetch_project(gateway: &dyn RemoteGateway) -> Result<Project> {
    let response = gateway
        .call(Endpoint::Project, RequestParams::default(), None)
        .await?;
    serde_json::from_value(response).context("failed to decode project settings")
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub project_id: Option<ProjectId>,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            project_id: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct HttpGateway {
    http: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, config })
    }

    pub fn url(&self, endpoint: Endpoint, params: &RequestParams) -> Result<Url, GatewayError> {
        let mut consumed = Vec::new();
        let mut path = String::new();
        for segment in endpoint.path().split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            if let Some(name) = segment.strip_prefix(':') {
                let value = params
                    .placeholder(name)
                    .ok_or_else(|| GatewayError::MissingParam {
                        endpoint: endpoint.name(),
                        param: name.to_string(),
                    })?;
                path.push_str(&value);
                consumed.push(name);
            } else {
                path.push_str(segment);
            }
        }

        let mut url = Url::parse(&format!(
            "{}{path}",
            self.config.base_url.trim_end_matches('/')
        ))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(project_id) = self.config.project_id {
                query.append_pair("project", &project_id.to_string());
            }
            for name in ["taskID", "annotationID", "draftID"] {
                if consumed.contains(&name) {
                    continue;
                }
                if let Some(value) = params.placeholder(name) {
                    query.append_pair(name, &value);
                }
            }
            for (key, value) in &params.query {
                query.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn call(
        &self,
        endpoint: Endpoint,
        params: RequestParams,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = self.url(endpoint, &params)?;
        debug!(endpoint = endpoint.name(), url = %url, "gateway: request");

        let mut request = self.http.request(endpoint.method(), url);
        if let Some(token) = &self.config.api_token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                endpoint: endpoint.name(),
                source,
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| GatewayError::Transport {
                endpoint: endpoint.name(),
                source,
            })?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                endpoint: endpoint.name(),
                status: status.as_u16(),
                error: ApiError::from_response(status.as_u16(), &text),
            }
            .into());
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(json!({ "ok": true }));
        }

        serde_json::from_str(&text).map_err(|source| {
            GatewayError::Decode {
                endpoint: endpoint.name(),
                source,
            }
            .into()
        })
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;

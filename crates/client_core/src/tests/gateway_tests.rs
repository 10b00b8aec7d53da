use std::sync::Arc;

use super::*;
use axum::{
    extract::State,
    http::{HeaderMap, Method as HttpMethod, StatusCode as HttpStatus, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct SeenRequest {
    method: String,
    path: String,
    query: Option<String>,
    authorization: Option<String>,
    body: String,
}

#[derive(Clone, Default)]
struct ServerState {
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

async fn handle_any(
    State(state): State<ServerState>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.seen.lock().await.push(SeenRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    });

    match (method.as_str(), uri.path()) {
        ("GET", "/api/dm/project") => Json(json!({
            "id": 3,
            "title": "Cats",
            "label_config": "<View/>",
            "show_collab_predictions": true,
            "instruction": "  be precise  "
        }))
        .into_response(),
        ("GET", "/api/tasks/12") => Json(json!({
            "id": 12,
            "data": {"image": "a.png"},
            "annotations": [{"id": 5, "result": []}],
            "drafts": [{"id": 9, "annotation": 5, "result": [{"value": 1}]}]
        }))
        .into_response(),
        ("GET", "/api/dm/tasks/next") => (
            HttpStatus::NOT_FOUND,
            Json(json!({"detail": "label stream is empty"})),
        )
            .into_response(),
        ("PATCH", path) if path.starts_with("/api/annotations/") => {
            Json(json!({"id": 42, "result": []})).into_response()
        }
        ("DELETE", _) => HttpStatus::NO_CONTENT.into_response(),
        ("POST", "/api/tasks/12/annotations") => (
            HttpStatus::BAD_REQUEST,
            Json(json!({"detail": "result must not be empty"})),
        )
            .into_response(),
        ("GET", "/api/tasks/13") => "this is not json".into_response(),
        _ => (HttpStatus::INTERNAL_SERVER_ERROR, "unexpected request").into_response(),
    }
}

async fn spawn_label_server() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .fallback(handle_any)
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn live_gateway(base_url: String) -> HttpGateway {
    HttpGateway::new(GatewayConfig {
        base_url,
        api_token: Some("secret-token".to_string()),
        project_id: Some(ProjectId(3)),
        request_timeout: Duration::from_secs(5),
    })
    .expect("gateway")
}

fn offline_gateway(project_id: Option<ProjectId>) -> HttpGateway {
    let mut config = GatewayConfig::new("http://labels.test/");
    config.project_id = project_id;
    HttpGateway::new(config).expect("gateway")
}

#[test]
fn endpoint_table_matches_server_routes() {
    assert_eq!(Endpoint::SubmitAnnotation.method(), Method::POST);
    assert_eq!(Endpoint::UpdateDraft.method(), Method::PATCH);
    assert_eq!(Endpoint::DeleteAnnotation.method(), Method::DELETE);
    assert_eq!(Endpoint::NextTask.path(), "/api/dm/tasks/next");
    assert_eq!(
        Endpoint::CreateDraftForAnnotation.path(),
        "/api/tasks/:taskID/annotations/:annotationID/drafts"
    );
    assert_eq!(Endpoint::CreateDraftForTask.name(), "createDraftForTask");
}

#[test]
fn url_substitutes_path_parameters() {
    let gateway = offline_gateway(None);
    let url = gateway
        .url(
            Endpoint::CreateDraftForAnnotation,
            &RequestParams::annotation(TaskId(7), AnnotationId(42)),
        )
        .expect("url");

    assert_eq!(
        url.as_str(),
        "http://labels.test/api/tasks/7/annotations/42/drafts"
    );
}

#[test]
fn url_sends_unused_ids_and_extra_pairs_as_query() {
    let gateway = offline_gateway(Some(ProjectId(3)));
    let params = RequestParams::annotation(TaskId(7), AnnotationId(42))
        .with_query("review", "reject")
        .with_query("review_text", "bad label");
    let url = gateway
        .url(Endpoint::UpdateAnnotation, &params)
        .expect("url");

    assert_eq!(url.path(), "/api/annotations/42");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        pairs,
        vec![
            ("project".to_string(), "3".to_string()),
            ("taskID".to_string(), "7".to_string()),
            ("review".to_string(), "reject".to_string()),
            ("review_text".to_string(), "bad label".to_string()),
        ]
    );
    assert_eq!(params.query_value("review"), Some("reject"));
}

#[test]
fn url_without_query_has_no_question_mark() {
    let gateway = offline_gateway(None);
    let url = gateway
        .url(Endpoint::NextTask, &RequestParams::default())
        .expect("url");
    assert_eq!(url.as_str(), "http://labels.test/api/dm/tasks/next");
}

#[test]
fn url_reports_missing_path_parameter() {
    let gateway = offline_gateway(None);
    let err = gateway
        .url(Endpoint::UpdateDraft, &RequestParams::task(TaskId(1)))
        .expect_err("draft id is required");
    assert!(matches!(
        err,
        GatewayError::MissingParam { endpoint: "updateDraft", ref param } if param == "draftID"
    ));
}

#[test]
fn response_id_accepts_numbers_and_numeric_strings() {
    assert_eq!(response_id(&json!({"id": 15})), Some(15));
    assert_eq!(response_id(&json!({"id": "16"})), Some(16));
    assert_eq!(response_id(&json!({"id": null})), None);
    assert_eq!(response_id(&json!({"ok": true})), None);
}

#[tokio::test]
async fn call_sends_token_project_and_body() {
    let (server_url, state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let response = gateway
        .call(
            Endpoint::UpdateAnnotation,
            RequestParams::annotation(TaskId(12), AnnotationId(42)).with_query("review", "fix"),
            Some(json!({"result": [], "lead_time": 1.5})),
        )
        .await
        .expect("update");
    assert_eq!(response_id(&response), Some(42));

    let seen = state.seen.lock().await.clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "PATCH");
    assert_eq!(seen[0].path, "/api/annotations/42");
    assert_eq!(
        seen[0].query.as_deref(),
        Some("project=3&taskID=12&review=fix")
    );
    assert_eq!(seen[0].authorization.as_deref(), Some("Token secret-token"));
    let body: Value = serde_json::from_str(&seen[0].body).expect("json body");
    assert_eq!(body, json!({"result": [], "lead_time": 1.5}));
}

#[tokio::test]
async fn no_content_parses_as_ok() {
    let (server_url, _state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let response = gateway
        .call(Endpoint::DeleteDraft, RequestParams::draft(DraftId(9)), None)
        .await
        .expect("delete draft");
    assert_eq!(response, json!({"ok": true}));
}

#[tokio::test]
async fn non_success_status_carries_server_detail() {
    let (server_url, _state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let err = gateway
        .call(
            Endpoint::SubmitAnnotation,
            RequestParams::task(TaskId(12)),
            Some(json!({"result": []})),
        )
        .await
        .expect_err("bad request");
    let gateway_err = err.downcast_ref::<GatewayError>().expect("gateway error");
    assert!(matches!(
        gateway_err,
        GatewayError::Status { status: 400, error, .. }
            if error.code == ErrorCode::Validation && error.message == "result must not be empty"
    ));
    assert!(!gateway_err.is_not_found());
}

#[tokio::test]
async fn not_found_is_recognizable() {
    let (server_url, _state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let err = gateway
        .call(Endpoint::NextTask, RequestParams::default(), None)
        .await
        .expect_err("empty stream");
    assert!(err
        .downcast_ref::<GatewayError>()
        .is_some_and(GatewayError::is_not_found));
}

#[tokio::test]
async fn undecodable_body_is_reported() {
    let (server_url, _state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let err = gateway
        .call(Endpoint::Task, RequestParams::task(TaskId(13)), None)
        .await
        .expect_err("not json");
    assert!(matches!(
        err.downcast_ref::<GatewayError>(),
        Some(GatewayError::Decode { endpoint: "task", .. })
    ));
}

#[tokio::test]
async fn fetch_project_decodes_settings() {
    let (server_url, _state) = spawn_label_server().await.expect("spawn server");
    let gateway = live_gateway(server_url);

    let project = fetch_project(&gateway).await.expect("project");
    assert_eq!(project.id, ProjectId(3));
    assert!(project.show_collab_predictions);
    assert!(project.enable_empty_annotation);
    assert_eq!(project.instruction_text().as_deref(), Some("be precise"));
}

#[tokio::test]
async fn transport_failure_is_typed() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let gateway = live_gateway("http://127.0.0.1:1".to_string());
    let err = gateway
        .call(Endpoint::Project, RequestParams::default(), None)
        .await
        .expect_err("nothing listens on port 1");
    assert!(matches!(
        err.downcast_ref::<GatewayError>(),
        Some(GatewayError::Transport { endpoint: "project", .. })
    ));
}

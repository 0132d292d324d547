//! RESTful API接口模块
//!
//! IHE 接入端点：
//! - `POST /ihe/messages`：HL7v2 / JSON 入站消息
//! - `POST /ihe/ian`、`POST /ihe/mpps`、`POST /ihe/ups`：工作流实体接入
//! - `POST /ihe/ups/:ups_id/status`：UPS状态推进
//! - `GET /ihe/worklist`：工作列表查询

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dwf_core::{DwfError, RequestHeaders, WorklistFilter, WorklistItem};
use dwf_workflow::{
    IanPayload, IngestOutcome, IngestStatus, IngestionPipeline, MppsPayload, SignedRequest, UpsPayload,
    UpsStatusUpdate, WorklistService,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::gateway::{GatewayResponse, MessageGateway};

/// API状态
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<MessageGateway>,
    pub pipeline: Arc<IngestionPipeline>,
    pub worklist: WorklistService,
}

impl ApiState {
    pub fn new(gateway: MessageGateway, pipeline: IngestionPipeline, worklist: WorklistService) -> Self {
        Self {
            gateway: Arc::new(gateway),
            pipeline: Arc::new(pipeline),
            worklist,
        }
    }
}

/// 错误到HTTP状态码的映射
#[derive(Debug)]
pub struct ApiError(pub DwfError);

impl From<DwfError> for ApiError {
    fn from(err: DwfError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DwfError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            DwfError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            DwfError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DwfError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, "invalid_state_transition"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": code, "message": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    let mut out = RequestHeaders::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str(), value);
        }
    }
    out
}

/// 携带签名头或配置了密钥时交给接入流程校验
fn signed_request(state: &ApiState, headers: &HeaderMap, body: &Bytes) -> Option<SignedRequest> {
    let headers = request_headers(headers);
    if headers.has_signature() || state.pipeline.verifier().is_enabled() {
        Some(SignedRequest::new(headers, body.to_vec()))
    } else {
        None
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(DwfError::Validation(format!("malformed JSON body: {}", e))))
}

fn ingest_response(outcome: IngestOutcome, id_key: &str) -> (StatusCode, Json<Value>) {
    let status = match outcome.status {
        IngestStatus::Created => StatusCode::CREATED,
        IngestStatus::Exists => StatusCode::OK,
    };
    let mut body = json!({ "status": outcome.status });
    body[id_key] = Value::String(outcome.id);
    (status, Json(body))
}

/// API处理器
pub struct ApiHandler;

impl ApiHandler {
    /// 健康检查
    pub async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }

    /// 入站消息
    pub async fn receive_message(
        State(state): State<ApiState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, Json<GatewayResponse>) {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let response = state.gateway.receive(&body, content_type).await;
        let status = StatusCode::from_u16(response.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(response))
    }

    pub async fn receive_ian(
        State(state): State<ApiState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ApiResult<(StatusCode, Json<Value>)> {
        let payload: IanPayload = parse_body(&body)?;
        let signed = signed_request(&state, &headers, &body);
        let outcome = state.pipeline.ingest_ian(&payload, signed).await?;
        Ok(ingest_response(outcome, "ian_id"))
    }

    pub async fn receive_mpps(
        State(state): State<ApiState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ApiResult<(StatusCode, Json<Value>)> {
        let payload: MppsPayload = parse_body(&body)?;
        let signed = signed_request(&state, &headers, &body);
        let outcome = state.pipeline.ingest_mpps(&payload, signed).await?;
        Ok(ingest_response(outcome, "pps_uid"))
    }

    pub async fn receive_ups(
        State(state): State<ApiState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ApiResult<(StatusCode, Json<Value>)> {
        let payload: UpsPayload = parse_body(&body)?;
        let signed = signed_request(&state, &headers, &body);
        let outcome = state.pipeline.ingest_ups(&payload, signed).await?;
        Ok(ingest_response(outcome, "ups_id"))
    }

    pub async fn update_ups_status(
        State(state): State<ApiState>,
        Path(ups_id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ApiResult<Json<Value>> {
        let update: UpsStatusUpdate = parse_body(&body)?;
        let signed = signed_request(&state, &headers, &body);
        let ups = state.pipeline.update_ups_status(&ups_id, &update, signed).await?;
        Ok(Json(json!(ups)))
    }

    pub async fn get_worklist(
        State(state): State<ApiState>,
        Query(query): Query<WorklistQuery>,
    ) -> ApiResult<Json<Vec<WorklistItem>>> {
        let filter = WorklistFilter {
            manager: query.manager.filter(|m| !m.is_empty()),
            user: query.user.filter(|u| !u.is_empty()),
        };
        Ok(Json(state.worklist.get_worklist(&filter).await?))
    }
}

/// 工作列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct WorklistQuery {
    pub manager: Option<String>,
    pub user: Option<String>,
}

/// 创建API路由
pub fn create_api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(ApiHandler::health_check))
        .route("/ihe/messages", post(ApiHandler::receive_message))
        .route("/ihe/ian", post(ApiHandler::receive_ian))
        .route("/ihe/mpps", post(ApiHandler::receive_mpps))
        .route("/ihe/ups", post(ApiHandler::receive_ups))
        .route("/ihe/ups/:ups_id/status", post(ApiHandler::update_ups_status))
        .route("/ihe/worklist", get(ApiHandler::get_worklist))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// API服务器
pub struct ApiServer {
    app: Router,
}

impl ApiServer {
    pub fn new(state: ApiState) -> Self {
        let app = create_api_routes(state).layer(CorsLayer::permissive());
        Self { app }
    }

    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        info!("Starting API server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_queue::LocalTaskQueue;
    use crate::parser::{build_parser, ParserKind};
    use crate::test_support::SAMPLE_HL7;
    use axum::{body::Body, http::Request};
    use dwf_core::{SignatureVerifier, TaskRegistry, WorkflowStore};
    use dwf_database::MemoryStore;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(store: Arc<MemoryStore>, secret: Option<&str>) -> Router {
        let queue = Arc::new(LocalTaskQueue::start(TaskRegistry::new(), 3, Duration::from_millis(1)));
        let state = ApiState::new(
            MessageGateway::new(store.clone(), build_parser(ParserKind::Structured)),
            IngestionPipeline::new(store.clone(), queue, SignatureVerifier::new(secret.map(str::to_string))),
            WorklistService::new(store),
        );
        create_api_routes(state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_hl7_message_endpoint() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/ihe/messages")
                .header(CONTENT_TYPE, "x-application/hl7-v2+er7")
                .body(Body::from(SAMPLE_HL7))
                .unwrap()
        };

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["message_id"], "MSG00001");
        assert_eq!(body["data"]["correlation_id"], "ORD448");

        let (status, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Message already exists");
    }

    #[tokio::test]
    async fn test_message_endpoint_failure_is_500() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let (status, body) = send(&app, post_json("/ihe/messages", "[")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to accept message");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_ian_endpoint_created_then_exists() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let body = r#"{"ian_id":"IAN-1","source":"OrthancAE","sop_instance_uids":"1.2.3.4"}"#;

        let (status, json) = send(&app, post_json("/ihe/ian", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json, json!({"status": "created", "ian_id": "IAN-1"}));

        let (status, json) = send(&app, post_json("/ihe/ian", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "exists");
    }

    #[tokio::test]
    async fn test_validation_and_malformed_body_are_400() {
        let app = app_with(Arc::new(MemoryStore::new()), None);

        let (status, json) = send(&app, post_json("/ihe/mpps", r#"{"actor":"CT-1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");

        let (status, _) = send(&app, post_json("/ihe/ups", "{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signature_enforced_when_secret_configured() {
        let app = app_with(Arc::new(MemoryStore::new()), Some("s3cret"));
        let body = r#"{"pps_uid":"MPPS-1","status":"COMPLETED"}"#;

        let (status, json) = send(&app, post_json("/ihe/mpps", body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "forbidden");

        let sig = SignatureVerifier::new(Some("s3cret".to_string()))
            .sign(body.as_bytes())
            .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/ihe/mpps")
            .header(CONTENT_TYPE, "application/json")
            .header("x-signature", sig)
            .body(Body::from(body))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["pps_uid"], "MPPS-1");
    }

    #[tokio::test]
    async fn test_ups_status_endpoint() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let (status, _) = send(&app, post_json("/ihe/ups", r#"{"ups_id":"UPS-1"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = send(
            &app,
            post_json("/ihe/ups/UPS-1/status", r#"{"ups_status":"IN-PROGRESS"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ups_status"], "IN-PROGRESS");
        assert!(json["start_time"].is_string());

        let (status, _) = send(
            &app,
            post_json("/ihe/ups/UPS-1/status", r#"{"ups_status":"SCHEDULED"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            post_json("/ihe/ups/UPS-404/status", r#"{"ups_status":"COMPLETED"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ups_status_endpoint_requires_signature() {
        let store = Arc::new(MemoryStore::new());
        let app = app_with(store.clone(), Some("s3cret"));
        let verifier = SignatureVerifier::new(Some("s3cret".to_string()));
        let signed_post = |uri: &str, body: &str| {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .header("x-signature", verifier.sign(body.as_bytes()).unwrap())
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let (status, _) = send(&app, signed_post("/ihe/ups", r#"{"ups_id":"UPS-1"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);

        let update = r#"{"ups_status":"CANCELLED"}"#;
        let (status, json) = send(&app, post_json("/ihe/ups/UPS-1/status", update)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "forbidden");
        let ups = store.find_ups("UPS-1").await.unwrap().unwrap();
        assert_eq!(ups.ups_status.as_str(), "SCHEDULED");
        assert!(ups.end_time.is_none());

        let (status, json) = send(&app, signed_post("/ihe/ups/UPS-1/status", update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ups_status"], "CANCELLED");
    }

    #[tokio::test]
    async fn test_null_uid_list_accepted() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let body = r#"{"ian_id":"IAN-2","sop_instance_uids":null,"timestamp":""}"#;
        let (status, json) = send(&app, post_json("/ihe/ian", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["ian_id"], "IAN-2");
    }

    #[tokio::test]
    async fn test_worklist_endpoint_filters() {
        let store = Arc::new(MemoryStore::new());
        for (name, manager) in [("WLI-1", "radiology"), ("WLI-2", "cardiology")] {
            store
                .insert_worklist_item(&WorklistItem {
                    name: name.to_string(),
                    worklist_id: format!("WL-{}", name),
                    rp: None,
                    assigned_to: Some("alice".to_string()),
                    worklist_manager: Some(manager.to_string()),
                    status: "Open".to_string(),
                    partial_data_flag: false,
                })
                .await
                .unwrap();
        }
        let app = app_with(store, None);

        let request = Request::builder()
            .uri("/ihe/worklist?manager=radiology&user=alice")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "WLI-1");

        let request = Request::builder().uri("/ihe/worklist").body(Body::empty()).unwrap();
        let (_, json) = send(&app, request).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app_with(Arc::new(MemoryStore::new()), None);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }
}

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use report_flow::{
    AnalyzeOutcome, AssistantChat, AssistantConversation, HttpReportClient, InMemorySessionStorage,
    QaOutcome, ReportAnalyzer, ReportChat, ReportError, ReportSession, ReportStore, Selection,
    Session, SessionConfig, SessionStorage, UploadedFile,
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{
        AssistantMessageRequest, AssistantResponse, QuestionRequest, QuestionResponse,
        SessionResponse,
    },
};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn report_error(err: ReportError) -> ApiError {
    let (status, kind) = match &err {
        ReportError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        ReportError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        ReportError::NoActiveReport => (StatusCode::CONFLICT, "no_active_report"),
        ReportError::Busy(_) => (StatusCode::CONFLICT, "busy"),
        ReportError::TransportFailure(_) => (StatusCode::BAD_GATEWAY, "transport_failure"),
        ReportError::RemoteRejection(_) => (StatusCode::UNPROCESSABLE_ENTITY, "remote_rejection"),
        ReportError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
    };
    (
        status,
        Json(json!({
            "error": err.detail(),
            "kind": kind
        })),
    )
}

/// The remote collaborators every session talks to.
#[derive(Clone)]
pub struct RemoteServices {
    pub analyzer: Arc<dyn ReportAnalyzer>,
    pub report_chat: Arc<dyn ReportChat>,
    pub assistant: Arc<dyn AssistantChat>,
    pub store: Arc<dyn ReportStore>,
}

impl RemoteServices {
    pub fn http(client: HttpReportClient) -> Self {
        let client = Arc::new(client);
        Self {
            analyzer: client.clone(),
            report_chat: client.clone(),
            assistant: client.clone(),
            store: client,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub remote: RemoteServices,
    pub session_config: SessionConfig,
}

impl AppState {
    pub fn new(remote: RemoteServices, session_config: SessionConfig) -> Self {
        Self {
            session_storage: Arc::new(InMemorySessionStorage::new()),
            remote,
            session_config,
        }
    }

    fn new_session(&self) -> Session {
        let report = ReportSession::new(
            self.session_config.clone(),
            self.remote.analyzer.clone(),
            self.remote.report_chat.clone(),
        );
        let assistant = AssistantConversation::new(self.remote.assistant.clone());
        Session::new(Uuid::new_v4().to_string(), report, assistant)
    }
}

pub fn create_app(config: &AppConfig) -> Result<Router, ReportError> {
    let client = HttpReportClient::new(&config.client)?;
    info!("Forwarding report analysis to {}", client.base_url());

    let app_state = AppState::new(RemoteServices::http(client), config.session.clone());
    spawn_idle_sweep(app_state.session_storage.clone(), config.session_idle_timeout);
    Ok(build_router(app_state))
}

/// Periodically drops sessions nobody has loaded within `max_idle`.
/// Must be called from within a tokio runtime.
pub fn spawn_idle_sweep(
    storage: Arc<dyn SessionStorage>,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = max_idle.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
    info!(
        "Sessions expire after {}s idle, checked every {}s",
        max_idle.as_secs(),
        period.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = storage.evict_idle(max_idle).await {
                warn!("Idle session sweep failed: {}", e);
            }
        }
    })
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/reports/sessions", post(create_session))
        .route(
            "/reports/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/reports/sessions/{session_id}/file", post(select_file))
        .route("/reports/sessions/{session_id}/analyze", post(analyze))
        .route("/reports/sessions/{session_id}/questions", post(ask_question))
        .route("/reports/sessions/{session_id}/reset", post(reset_session))
        .route("/reports/sessions/{session_id}/store", post(store_report))
        .route(
            "/reports/sessions/{session_id}/assistant",
            get(get_assistant).post(send_assistant_message),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Report Analysis Service",
        "version": "0.1.0",
        "description": "Upload a medical report, review its analysis and ask questions about it",
        "endpoints": {
            "POST /reports/sessions": "Create a report session",
            "GET /reports/sessions/{session_id}": "Get session state and analysis",
            "DELETE /reports/sessions/{session_id}": "Discard a session",
            "POST /reports/sessions/{session_id}/file": "Select a report file (multipart field 'file')",
            "POST /reports/sessions/{session_id}/analyze": "Analyze the selected file",
            "POST /reports/sessions/{session_id}/questions": "Ask a question about the analyzed report",
            "POST /reports/sessions/{session_id}/reset": "Reset the session",
            "POST /reports/sessions/{session_id}/store": "Store the selected file",
            "GET|POST /reports/sessions/{session_id}/assistant": "General health assistant chat",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn load_session(state: &AppState, session_id: &str) -> Result<Session, ApiError> {
    match state.session_storage.get(session_id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(not_found_error("Session not found", session_id)),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

async fn session_response(session: &Session) -> SessionResponse {
    SessionResponse::from_snapshot(&session.id, session.report.snapshot().await)
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state.new_session();
    info!("Creating report session {}", session.id);

    state.session_storage.save(session.clone()).await.map_err(|e| {
        error!("Failed to create session: {}", e);
        internal_error("Failed to create report session", &e.to_string())
    })?;

    Ok((StatusCode::CREATED, Json(session_response(&session).await)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = load_session(&state, &session_id).await?;
    Ok(Json(session_response(&session).await))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    let session = load_session(&state, &session_id).await?;
    session.report.reset().await;

    state.session_storage.delete(&session_id).await.map_err(|e| {
        error!("Failed to delete session {}: {}", session_id, e);
        internal_error("Failed to delete session", &e.to_string())
    })?;

    info!("Deleted report session {}", session_id);
    Ok(Json(json!({
        "session_id": session_id,
        "status": "deleted"
    })))
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed multipart upload: {}", e);
        bad_request_error("Malformed multipart upload")
    })? {
        if !matches!(field.name(), Some("file") | Some("report")) {
            continue;
        }

        let name = field.file_name().unwrap_or("report.pdf").to_string();
        let content_type = field
            .content_type()
            .filter(|mime| *mime != "application/octet-stream")
            .map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read upload bytes: {}", e);
            bad_request_error("Failed to read file data")
        })?;

        return Ok(match content_type {
            Some(mime) => UploadedFile::with_mime_type(name, mime, bytes.to_vec()),
            None => UploadedFile::new(name, bytes.to_vec()),
        });
    }

    Err(bad_request_error("No file provided"))
}

async fn select_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = load_session(&state, &session_id).await?;
    let file = read_upload(multipart).await?;
    info!("Session {}: received {}", session_id, file.name());

    let selection = session.report.select_file(file).await.map_err(report_error)?;
    let status = match selection {
        Selection::Selected => StatusCode::OK,
        // The analysis keeps running after this response; observe it via GET.
        Selection::Analyzing(_) => StatusCode::ACCEPTED,
    };

    Ok((status, Json(session_response(&session).await)))
}

async fn analyze(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = load_session(&state, &session_id).await?;

    // Spawned so a dropped request cannot strand the session in `Uploading`.
    let report = session.report.clone();
    let outcome = tokio::spawn(async move { report.analyze().await })
        .await
        .map_err(|e| {
            error!("Analysis task for session {} failed: {}", session_id, e);
            internal_error("Analysis task failed", &e.to_string())
        })?
        .map_err(report_error)?;

    if outcome == AnalyzeOutcome::Discarded {
        info!("Session {}: analysis superseded before completion", session_id);
    }

    Ok(Json(session_response(&session).await))
}

async fn ask_question(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<QuestionRequest>,
) -> ApiResult<QuestionResponse> {
    let session = load_session(&state, &session_id).await?;

    let report = session.report.clone();
    let outcome = tokio::spawn(async move { report.ask_question(&request.question).await })
        .await
        .map_err(|e| {
            error!("Question task for session {} failed: {}", session_id, e);
            internal_error("Question task failed", &e.to_string())
        })?
        .map_err(report_error)?;

    let response = match outcome {
        QaOutcome::Answered(exchange) => QuestionResponse {
            status: "answered".to_string(),
            question: Some(exchange.question.clone()),
            exchange: Some(exchange),
            error: None,
        },
        QaOutcome::QaFailed { question, message } => QuestionResponse {
            status: "failed".to_string(),
            exchange: None,
            question: Some(question),
            error: Some(message),
        },
        QaOutcome::Discarded => QuestionResponse {
            status: "discarded".to_string(),
            exchange: None,
            question: None,
            error: None,
        },
    };

    Ok(Json(response))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = load_session(&state, &session_id).await?;
    session.report.reset().await;
    Ok(Json(session_response(&session).await))
}

async fn store_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    let session = load_session(&state, &session_id).await?;
    let file = session
        .report
        .file()
        .await
        .ok_or_else(|| report_error(ReportError::InvalidState("no file selected".to_string())))?;

    let store = state.remote.store.clone();
    let stored = tokio::spawn(async move { store.store(&file).await })
        .await
        .map_err(|e| internal_error("Storage task failed", &e.to_string()))?
        .map_err(report_error)?;

    Ok(Json(json!({
        "session_id": session_id,
        "message": stored.message,
        "file": stored.file
    })))
}

async fn get_assistant(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<AssistantResponse> {
    let session = load_session(&state, &session_id).await?;
    Ok(Json(AssistantResponse {
        reply: None,
        messages: session.assistant.messages().await,
    }))
}

async fn send_assistant_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AssistantMessageRequest>,
) -> ApiResult<AssistantResponse> {
    let session = load_session(&state, &session_id).await?;

    let assistant = session.assistant.clone();
    let reply = tokio::spawn(async move { assistant.send(&request.message).await })
        .await
        .map_err(|e| internal_error("Assistant task failed", &e.to_string()))?
        .map_err(report_error)?;

    Ok(Json(AssistantResponse {
        reply: Some(reply),
        messages: session.assistant.messages().await,
    }))
}

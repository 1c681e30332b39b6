//! Session routes.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::warn,
};

use {
    courier_engine::SessionConfig,
    courier_sessions::{SessionError, SessionManager, SessionSnapshot, SessionStatus},
};

/// Shared handler state.
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Build the API router.
pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{name}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/api/sessions/{name}/start", post(start_session))
        .route("/api/sessions/{name}/stop", post(stop_session))
        .route("/api/sessions/{name}/restart", post(restart_session))
        .route("/api/sessions/{name}/logout", post(logout_session))
        .route("/api/sessions/{name}/auth/qr", get(get_qr))
        .route("/api/sessions/{name}/auth/request-code", post(request_pair_code))
        .route("/ws", get(crate::ws::events_ws))
        .with_state(Arc::new(AppState { manager }))
}

/// API-facing error wrapper.
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::AlreadyStarted(_) | SessionError::UnexpectedStatus { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            },
            SessionError::BadEventFilter(_) => StatusCode::BAD_REQUEST,
            SessionError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "session operation failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<SessionSnapshot>> {
    Json(state.manager.list(query.all))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    name: String,
    #[serde(default)]
    config: SessionConfig,
    /// Start the session right away. Defaults to true.
    #[serde(default = "default_start")]
    start: bool,
}

fn default_start() -> bool {
    true
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    state.manager.upsert(&request.name, request.config).await?;
    if request.start {
        let snapshot = state.manager.start(&request.name).await?;
        return Ok((StatusCode::CREATED, Json(snapshot)));
    }
    let snapshot = state
        .manager
        .get(&request.name)
        .ok_or_else(|| SessionError::NotFound(request.name.clone()))?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .manager
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError(SessionError::NotFound(name)))
}

async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(config): Json<SessionConfig>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.manager.update(&name, config).await?))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    /// Block until the session is `WORKING` before responding.
    #[serde(default)]
    wait: bool,
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<StartQuery>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let _ = state.manager.start(&name).await?;
    if query.wait {
        let _ = state
            .manager
            .wait_until_status(&name, &[SessionStatus::Working])
            .await?;
    }
    state
        .manager
        .get(&name)
        .map(Json)
        .ok_or_else(|| ApiError(SessionError::NotFound(name)))
}

async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.stop(&name, false).await?;
    Ok(Json(json!({ "stopped": name })))
}

async fn restart_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state.manager.stop(&name, true).await?;
    Ok(Json(state.manager.start(&name).await?))
}

async fn logout_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.logout(&name).await?;
    Ok(Json(json!({ "loggedOut": name })))
}

async fn get_qr(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let qr = state.manager.qr(&name)?;
    Ok(Json(json!({ "qr": qr })))
}

#[derive(Debug, Deserialize)]
struct PairCodeRequest {
    phone: String,
}

async fn request_pair_code(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<PairCodeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let code = state.manager.request_pair_code(&name, &request.phone).await?;
    Ok(Json(json!({ "code": code })))
}

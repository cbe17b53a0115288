//! API routes for vigild
//!
//! Errors are returned as `{code, message}` with the error's HTTP status.

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};
use vigil_shared::{
    AcknowledgmentRecord, Alert, AlertId, CreateAlertRequest, ResponseType, Scope, VigilError,
    VERSION,
};

type AppStateArc = Arc<AppState>;

/// Error body for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub struct ApiError(VigilError);

impl From<VigilError> for ApiError {
    fn from(e: VigilError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id(raw: &str) -> ApiResult<AlertId> {
    Ok(raw.parse::<AlertId>()?)
}

// ============================================================================
// Alert Routes
// ============================================================================

pub fn alert_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/alerts", post(create_alert))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/alerts/:id/acknowledgments", get(list_acknowledgments))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertResponse {
    pub alert: Alert,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub responder_id: String,
    /// Parsed leniently so unknown types come back as a validation error
    pub response_type: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcknowledgeResponse {
    pub alert: Alert,
    pub record: AcknowledgmentRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub responder_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

async fn create_alert(
    State(state): State<AppStateArc>,
    Json(req): Json<CreateAlertRequest>,
) -> ApiResult<(StatusCode, Json<AlertResponse>)> {
    let alert = state.engine.create_alert(req).await?;
    Ok((StatusCode::CREATED, Json(AlertResponse { alert })))
}

async fn get_alert(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Json<Alert>> {
    let alert = state.engine.get_alert(parse_id(&id)?).await?;
    Ok(Json(alert))
}

async fn acknowledge_alert(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResult<Json<AcknowledgeResponse>> {
    let alert_id = parse_id(&id)?;
    let response_type: ResponseType = req.response_type.parse()?;
    let outcome = state
        .engine
        .acknowledge_alert(alert_id, &req.responder_id, response_type, req.note)
        .await?;
    Ok(Json(AcknowledgeResponse {
        alert: outcome.alert,
        record: outcome.record,
    }))
}

async fn resolve_alert(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<AlertResponse>> {
    let outcome = state
        .engine
        .resolve_alert(parse_id(&id)?, &req.responder_id, req.note)
        .await?;
    Ok(Json(AlertResponse {
        alert: outcome.alert,
    }))
}

async fn list_acknowledgments(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AcknowledgmentRecord>>> {
    let records = state.engine.acknowledgments(parse_id(&id)?).await?;
    Ok(Json(records))
}

// ============================================================================
// Facility Routes
// ============================================================================

pub fn facility_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/facilities/:facility/alerts", get(active_alerts))
        .route("/facilities/:facility/events", get(event_stream))
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub roles: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub client_id: String,
    #[serde(default)]
    pub roles: Option<String>,
}

async fn active_alerts(
    State(state): State<AppStateArc>,
    Path(facility): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Json<Vec<Alert>> {
    let scope = Scope::facility(facility).with_roles(Scope::parse_roles(query.roles.as_deref()));
    Json(state.engine.get_active_alerts(&scope).await)
}

async fn event_stream(
    State(state): State<AppStateArc>,
    Path(facility): Path<String>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let scope = Scope::facility(facility).with_roles(Scope::parse_roles(query.roles.as_deref()));
    let subscription = state.engine.subscribe(&query.client_id, scope)?;
    info!(client_id = %query.client_id, "Event stream opened");

    let stream = subscription.map(|event| {
        Event::default()
            .event(event.event_type.to_string())
            .id(format!("{}:{}", event.alert_id, event.sequence))
            .json_data(&event)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub subscribers: usize,
    pub armed_timers: usize,
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        subscribers: state.engine.registry().len(),
        armed_timers: state.engine.scheduler().pending_count(),
    })
}

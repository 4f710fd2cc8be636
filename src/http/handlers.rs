// src/http/handlers.rs

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::http::response::{ok, ApiError, ApiResult, Envelope};
use crate::http::AppState;
use crate::registry::{ClientConfig, ClientPatch, NewClient};
use crate::supervisor::{BotInstance, FleetInfo, Supervisor};
use crate::types::{BotStatus, ProviderKind};

/// One row of the client list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    #[serde(flatten)]
    pub instance: BotInstance,
    pub provider_kind: ProviderKind,
    pub active: bool,
    pub authenticated: bool,
    pub has_qr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
}

impl ClientView {
    fn new(supervisor: &Supervisor, instance: BotInstance) -> Self {
        let config = supervisor.registry().get(&instance.id);
        Self {
            provider_kind: config.as_ref().map(|c| c.provider_kind).unwrap_or_default(),
            active: config.as_ref().is_some_and(|c| c.active),
            authenticated: instance.status == BotStatus::Online,
            has_qr: supervisor.has_qr(&instance.id),
            uptime_secs: instance.uptime_secs(Utc::now()),
            instance,
        }
    }
}

/// Client configuration as exposed over HTTP. Secrets are masked.
fn public_config(mut config: ClientConfig) -> ClientConfig {
    if let Some(creds) = config.provider_credentials.as_mut() {
        creds.access_token = mask(&creds.access_token);
        creds.verify_token = mask(&creds.verify_token);
    }
    config
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

pub async fn fleet_info(State(state): State<AppState>) -> ApiResult<FleetInfo> {
    ok(state.supervisor.info())
}

pub async fn list_clients(State(state): State<AppState>) -> ApiResult<Vec<ClientView>> {
    let supervisor = &state.supervisor;
    let views = supervisor
        .get_all_statuses()
        .into_iter()
        .map(|instance| ClientView::new(supervisor, instance))
        .collect();
    ok(views)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    #[serde(flatten)]
    pub client: NewClient,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_auto_start() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedClient {
    pub client: ClientConfig,
    pub status: BotStatus,
}

pub async fn create_client(
    State(state): State<AppState>,
    payload: Result<Json<CreateClientRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<CreatedClient>>), ApiError> {
    let Json(request) = payload?;
    let (config, instance) = state
        .supervisor
        .create_client(request.client, request.auto_start)
        .await?;

    let body = CreatedClient {
        client: public_config(config),
        status: instance.status,
    };
    Ok((StatusCode::CREATED, Json(Envelope::ok(body))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetail {
    #[serde(flatten)]
    pub view: ClientView,
    pub config: ClientConfig,
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClientDetail> {
    let supervisor = &state.supervisor;
    let instance = supervisor.get_status(&id)?;
    let config = supervisor
        .registry()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Client not found: {id}")))?;

    ok(ClientDetail {
        view: ClientView::new(supervisor, instance),
        config: public_config(config),
    })
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ClientPatch>, JsonRejection>,
) -> ApiResult<ClientConfig> {
    let Json(patch) = payload?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }
    let updated = state.supervisor.update_client(&id, &patch).await?;
    ok(public_config(updated))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub id: String,
    pub status: BotStatus,
    pub message: String,
}

pub async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ActionResult> {
    let removed = state.supervisor.remove_client(&id).await?;
    ok(ActionResult {
        message: format!("client {} deleted", removed.display_name),
        id,
        status: BotStatus::Offline,
    })
}

pub async fn start_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BotInstance> {
    ok(state.supervisor.start(&id).await?)
}

pub async fn stop_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ActionResult> {
    state.supervisor.stop(&id).await?;
    ok(ActionResult {
        message: format!("client {id} stopped"),
        id,
        status: BotStatus::Offline,
    })
}

pub async fn restart_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BotInstance> {
    ok(state.supervisor.restart(&id).await?)
}

pub async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ActionResult> {
    let instance = state.supervisor.reset_session(&id).await?;
    ok(ActionResult {
        message: format!("session of {id} cleared; new pairing code on the way"),
        id,
        status: instance.status,
    })
}

fn png(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        bytes,
    )
        .into_response()
}

pub async fn get_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.supervisor.read_qr(&id)? {
        Some(bytes) => Ok(png(bytes)),
        None => Err(ApiError::NotFound(format!(
            "no pairing code for {id}; the bot may be authenticated or not started"
        ))),
    }
}

/// Short alias used by operators: plain-text 404 instead of the envelope.
pub async fn get_qr_short(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.supervisor.read_qr(&id) {
        Ok(Some(bytes)) => png(bytes),
        Ok(None) | Err(_) => (StatusCode::NOT_FOUND, "QR not available").into_response(),
    }
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound(format!("route not found: {method} {}", uri.path()))
}

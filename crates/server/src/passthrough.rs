//! Plugin HTTP routes the host forwards under `/plugins/{id}`: status checks, user
//! preferences, autocomplete lookups, and the callbacks for dialogs, message buttons
//! and outgoing webhooks.
//!
//! Callback routes wait `integration_request_delay` seconds before running.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use wabridge_plugin::actions::{echo_outgoing_webhook, OutgoingWebhookResponse};
use wabridge_plugin::autocomplete::{AutocompleteListItem, DYNAMIC_ARGUMENT_PATH};
use wabridge_plugin::dialogs::{
    PostActionIntegrationRequest, PostActionIntegrationResponse, SubmitDialogRequest,
    SubmitDialogResponse,
};
use wabridge_plugin::preferences::{UserPreferences, WhatsappPreference};

use crate::api::ApiState;
use crate::auth;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreferenceQuery {
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    pub enabled: bool,
}

pub fn router(state: ApiState) -> Router {
    let callbacks = Router::new()
        .route("/dialog/1", post(submit_dialog_1))
        .route("/dialog/2", post(submit_dialog_2))
        .route("/dialog/error", post(submit_dialog_error))
        .route("/interactive/button/1", post(interactive_button))
        .route("/ephemeral/update", post(ephemeral_update))
        .route("/ephemeral/delete", post(ephemeral_delete))
        .route("/webhook/outgoing", post(outgoing_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), with_delay));

    Router::new()
        .route("/status", get(status))
        .route("/hello", get(hello))
        .route("/check_auth_header", get(check_auth_header))
        .route("/whatsapp/preferences", get(get_preferences).put(set_preferences))
        .route(DYNAMIC_ARGUMENT_PATH, get(dynamic_argument))
        .merge(callbacks)
        .with_state(state)
}

async fn with_delay(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    state.plugin.integration_delay().await;
    next.run(request).await
}

pub async fn status(State(state): State<ApiState>) -> Json<PluginStatus> {
    Json(PluginStatus { enabled: state.plugin.is_enabled() })
}

pub async fn hello() -> &'static str {
    "Hello World!"
}

pub async fn check_auth_header(headers: HeaderMap) -> String {
    let mut message = String::new();
    if !auth::user_id(&headers).is_empty() {
        message.push_str(
            "You are an authenticated user. The Authorization header should be an empty string.\n",
        );
    }
    let authorization =
        headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).unwrap_or_default();
    message.push_str(&format!("Authorization header: {authorization}"));
    message
}

pub async fn dynamic_argument(
    State(state): State<ApiState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<AutocompleteListItem>>, ApiError> {
    let suggestions = state.plugin.dynamic_argument_suggestions(&query).await.map_err(|error| {
        error!(
            event_name = "server.autocomplete.failed",
            error = %error,
            "dynamic argument lookup failed"
        );
        ApiError::internal(error.to_string())
    })?;
    Ok(Json(suggestions))
}

/// Reads `user_id` from the query string, falling back to a JSON body.
pub async fn get_preferences(
    State(state): State<ApiState>,
    Query(query): Query<PreferenceQuery>,
    body: Bytes,
) -> Result<Json<UserPreferences>, ApiError> {
    let user_id = match query.user_id.filter(|user_id| !user_id.is_empty()) {
        Some(user_id) => user_id,
        None => {
            serde_json::from_slice::<WhatsappPreference>(&body)
                .map_err(|_| ApiError::bad_request("invalid request body"))?
                .user_id
        }
    };
    if user_id.is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let preferences = state.app().whatsapp_preference(&user_id).await.map_err(|error| {
        error!(event_name = "server.preferences.read_failed", error = %error, "kv read failed");
        ApiError::internal("failed to read preferences")
    })?;
    Ok(Json(preferences))
}

pub async fn set_preferences(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let preference: WhatsappPreference =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("invalid request body"))?;
    state
        .app()
        .set_whatsapp_preference(&preference)
        .await
        .map_err(|error| ApiError::from_application("Failed to save preference", error))?;
    Ok(Json(json!({ "Status": "OK" })))
}

pub async fn submit_dialog_1(State(state): State<ApiState>, body: Bytes) -> Response {
    match parse::<SubmitDialogRequest>(&body, "SubmitDialogRequest") {
        Ok(request) => dialog_response(state.plugin.submit_dialog_1(request).await),
        Err(status) => status.into_response(),
    }
}

pub async fn submit_dialog_2(State(state): State<ApiState>, body: Bytes) -> Response {
    match parse::<SubmitDialogRequest>(&body, "SubmitDialogRequest") {
        Ok(request) => dialog_response(state.plugin.submit_dialog_2(request).await),
        Err(status) => status.into_response(),
    }
}

pub async fn submit_dialog_error(State(state): State<ApiState>) -> Json<SubmitDialogResponse> {
    Json(state.plugin.submit_dialog_error())
}

pub async fn interactive_button(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<PostActionIntegrationResponse>, Response> {
    let request = parse::<PostActionIntegrationRequest>(&body, "PostActionIntegrationRequest")
        .map_err(IntoResponse::into_response)?;
    state.plugin.interactive_button(request).await.map(Json).map_err(|error| {
        ApiError::from_application("Failed to handle interactive button", error).into_response()
    })
}

pub async fn ephemeral_update(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<PostActionIntegrationResponse>, StatusCode> {
    let request = parse::<PostActionIntegrationRequest>(&body, "PostActionIntegrationRequest")?;
    Ok(Json(state.plugin.ephemeral_update(request).await))
}

pub async fn ephemeral_delete(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<PostActionIntegrationResponse>, StatusCode> {
    let request = parse::<PostActionIntegrationRequest>(&body, "PostActionIntegrationRequest")?;
    Ok(Json(state.plugin.ephemeral_delete(request).await))
}

pub async fn outgoing_webhook(body: Bytes) -> Result<Json<OutgoingWebhookResponse>, StatusCode> {
    let payload = parse::<Value>(&body, "OutgoingWebhookPayload")?;
    echo_outgoing_webhook(&payload).map(Json).map_err(|encode_error| {
        error!(
            event_name = "server.webhook.outgoing_encode_failed",
            error = %encode_error,
            "failed to marshal payload back to JSON"
        );
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8], kind: &str) -> Result<T, StatusCode> {
    serde_json::from_slice(body).map_err(|decode_error| {
        error!(
            event_name = "server.passthrough.decode_failed",
            kind,
            error = %decode_error,
            "failed to decode request body"
        );
        StatusCode::BAD_REQUEST
    })
}

/// Empty 200 when the dialog was accepted, field errors otherwise.
fn dialog_response(response: SubmitDialogResponse) -> Response {
    if response.is_empty() {
        return StatusCode::OK.into_response();
    }
    Json(response).into_response()
}

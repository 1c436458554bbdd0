use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wabridge_core::domain::channel::Channel;
use wabridge_core::domain::session::{format_wire_time, Session, SessionId, SessionPatch};
use wabridge_plugin::host::User;
use wabridge_plugin::{Plugin, WebhookPayload, WhatsappApp};

use crate::auth::{disallow_guest, require_authenticated, require_system_admin};
use crate::error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub plugin: Arc<Plugin>,
}

impl ApiState {
    pub fn new(plugin: Arc<Plugin>) -> Self {
        Self { plugin }
    }

    pub fn app(&self) -> &Arc<WhatsappApp> {
        self.plugin.app()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateSessionRequest {
    #[serde(alias = "userID")]
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateChannelRequest {
    pub channel_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "OK" }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CloseUserSessionsResponse {
    pub status: &'static str,
    pub closed: u64,
    pub closed_at: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActiveUsersResponse {
    pub active_users: Vec<User>,
}

/// Session, channel and webhook endpoints under `/whatsapp`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/whatsapp/session", post(create_session))
        .route("/whatsapp/session/unclosed", get(list_unclosed_sessions))
        .route("/whatsapp/session/active_users", get(list_active_users))
        .route("/whatsapp/session/by_user/{user_id}", get(get_session_by_user))
        .route("/whatsapp/session/by_user/{user_id}/close", post(close_user_sessions))
        .route(
            "/whatsapp/session/{session_id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/whatsapp/session/{session_id}/close", post(close_session))
        .route("/whatsapp/channels", get(list_channels).post(create_channel))
        .route("/whatsapp/webhook", post(receive_webhook))
        .with_state(state)
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing session ID in request"));
    }

    let session = state
        .app()
        .get_session(&SessionId(session_id))
        .await
        .map_err(|error| ApiError::from_application("Failed to get session", error))?;
    Ok(Json(session))
}

pub async fn create_session(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Session>, ApiError> {
    let request: CreateSessionRequest = serde_json::from_slice(&body)
        .map_err(|error| ApiError::bad_request(format!("Invalid request body: {error}")))?;
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let session = state
        .app()
        .create_session(&request.user_id)
        .await
        .map_err(|error| ApiError::from_application("Failed to create session", error))?;
    publish_session_update(&state, &session.user_id).await;
    Ok(Json(session))
}

pub async fn close_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let caller = require_authenticated(&headers)?;
    require_system_admin(state.app().host().as_ref(), caller).await?;
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing session ID in request"));
    }

    let session = state
        .app()
        .close_session(&SessionId(session_id))
        .await
        .map_err(|error| ApiError::from_application("Failed to close session", error))?;
    info!(
        event_name = "server.session.closed",
        session_id = %session.id,
        closed_by = caller,
        "session closed over http"
    );
    publish_session_update(&state, &session.user_id).await;
    Ok(Json(StatusResponse::ok()))
}

pub async fn update_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<Session>, ApiError> {
    let caller = require_authenticated(&headers)?;
    require_system_admin(state.app().host().as_ref(), caller).await?;
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing session ID in request"));
    }
    let patch: SessionPatch = serde_json::from_slice(&body)
        .map_err(|error| ApiError::bad_request(format!("Invalid request body: {error}")))?;

    let session = state
        .app()
        .update_session(&SessionId(session_id), patch)
        .await
        .map_err(|error| ApiError::from_application("Failed to update session", error))?;
    publish_session_update(&state, &session.user_id).await;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let caller = require_authenticated(&headers)?;
    require_system_admin(state.app().host().as_ref(), caller).await?;
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing session ID in request"));
    }

    let session = state
        .app()
        .delete_session(&SessionId(session_id))
        .await
        .map_err(|error| ApiError::from_application("Failed to delete session", error))?;
    info!(
        event_name = "server.session.deleted",
        session_id = %session.id,
        deleted_by = caller,
        "session deleted over http"
    );
    publish_session_update(&state, &session.user_id).await;
    Ok(Json(StatusResponse::ok()))
}

pub async fn close_user_sessions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<CloseUserSessionsResponse>, ApiError> {
    let caller = require_authenticated(&headers)?;
    require_system_admin(state.app().host().as_ref(), caller).await?;
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing user ID in request"));
    }

    let outcome = state
        .app()
        .close_sessions_for_user(&user_id)
        .await
        .map_err(|error| ApiError::from_application("Failed to close session(s)", error))?;
    publish_session_update(&state, &user_id).await;
    Ok(Json(CloseUserSessionsResponse {
        status: "OK",
        closed: outcome.closed,
        closed_at: outcome.closed_at.as_ref().map(format_wire_time),
    }))
}

pub async fn list_active_users(
    State(state): State<ApiState>,
) -> Result<Json<ActiveUsersResponse>, ApiError> {
    let active_users = state
        .app()
        .list_active_users()
        .await
        .map_err(|error| ApiError::from_application("Failed to list active users", error))?;
    Ok(Json(ActiveUsersResponse { active_users }))
}

pub async fn get_session_by_user(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("missing user ID in request"));
    }

    let session = state.app().get_session_by_user(&user_id).await.map_err(|error| {
        if error.is_not_found() {
            return ApiError::new(StatusCode::NOT_FOUND, "session not found");
        }
        ApiError::from_application("Failed to get session", error)
    })?;
    Ok(Json(session))
}

pub async fn list_unclosed_sessions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = state
        .app()
        .list_unclosed_sessions()
        .await
        .map_err(|error| ApiError::from_application("Failed to list sessions", error))?;
    Ok(Json(sessions))
}

pub async fn list_channels(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Channel>>, ApiError> {
    require_authenticated(&headers)?;
    let channels = state.app().list_channels().await.map_err(|error| {
        warn!(event_name = "server.channels.list_failed", error = %error, "listing failed");
        ApiError::internal("Failed to get channels")
    })?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Channel>, ApiError> {
    let caller = require_authenticated(&headers)?;
    disallow_guest(state.app().host().as_ref(), caller).await?;
    let request = serde_json::from_slice::<CreateChannelRequest>(&body)
        .ok()
        .filter(|request| !request.channel_id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("invalid request body or channel_id missing"))?;

    let channel = state.app().create_channel(&request.channel_id).await.map_err(|error| {
        warn!(event_name = "server.channels.create_failed", error = %error, "create failed");
        ApiError::internal("Failed to create channel")
    })?;
    Ok(Json(channel))
}

pub async fn receive_webhook(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let payload = WebhookPayload::from_slice(&body)
        .map_err(|error| ApiError::bad_request(format!("Invalid request body: {error}")))?;

    state
        .app()
        .ingest_webhook(payload)
        .await
        .map_err(|error| ApiError::from_application("Failed to process webhook", error))?;
    Ok(Json(StatusResponse::ok()))
}

async fn publish_session_update(state: &ApiState, user_id: &str) {
    if let Err(error) = state.app().publish_session_update(user_id).await {
        warn!(
            event_name = "server.session.publish_failed",
            user_id,
            error = %error,
            "could not publish session update"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use wabridge_core::plugin_config::{ConfigurationStore, PluginSettings};
    use wabridge_db::{InMemoryChannelRepository, InMemorySessionRepository};
    use wabridge_plugin::host::{InMemoryHost, ServerSettings, User};
    use wabridge_plugin::{Plugin, PluginOptions, WhatsappApp};

    use super::{router, ApiState};
    use crate::auth::USER_ID_HEADER;

    struct Harness {
        host: Arc<InMemoryHost>,
        state: ApiState,
        router: Router,
    }

    async fn harness() -> Harness {
        let host =
            Arc::new(InMemoryHost::new(ServerSettings::default(), PluginSettings::with_defaults()));
        host.add_team("alpha", "Alpha").await;
        let app = Arc::new(WhatsappApp::new(
            host.clone(),
            Arc::new(InMemorySessionRepository::default()),
            Arc::new(InMemoryChannelRepository::default()),
            Arc::new(ConfigurationStore::new()),
        ));
        let plugin = Plugin::new(app, PluginOptions::default()).expect("plugin");
        let state = ApiState::new(Arc::new(plugin));
        Harness { host, router: router(state.clone()), state }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    fn as_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json body")
    }

    #[tokio::test]
    async fn create_then_close_session_as_admin() {
        let harness = harness().await;
        let admin = harness
            .host
            .add_user(User {
                username: "root".to_owned(),
                roles: "system_admin".to_owned(),
                ..User::default()
            })
            .await;
        let member =
            harness.host.add_user(User { username: "m".to_owned(), ..User::default() }).await;

        let (status, body) =
            send(&harness.router, post("/whatsapp/session", r#"{"user_id":"U1"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let session = as_json(&body);
        let id = session["ID"].as_str().expect("id").to_owned();
        assert_eq!(id.len(), 26);
        assert_eq!(session["UserID"], "U1");
        assert_eq!(session["ClosedAt"], "0001-01-01T00:00:00Z");

        let close_as = |user_id: &str| {
            Request::post(format!("/whatsapp/session/{id}/close"))
                .header(USER_ID_HEADER, user_id)
                .body(Body::empty())
                .expect("request")
        };

        let (status, _) = send(&harness.router, close_as(&member.id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&harness.router, close_as(&admin.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body), json!({"status": "OK"}));

        let (status, body) = send(&harness.router, close_as(&admin.id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(String::from_utf8(body).expect("utf8"), "Session already closed");

        let events = harness.host.events().await;
        assert!(events.iter().all(|event| event.event == "whatsapp_session_updated"));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn admin_can_update_close_by_user_and_delete_sessions() {
        let harness = harness().await;
        let admin = harness
            .host
            .add_user(User {
                username: "root".to_owned(),
                roles: "system_admin".to_owned(),
                ..User::default()
            })
            .await;
        let owner =
            harness.host.add_user(User { username: "owner".to_owned(), ..User::default() }).await;
        let create = format!(r#"{{"user_id":"{}"}}"#, owner.id);
        let (_, body) = send(&harness.router, post("/whatsapp/session", &create)).await;
        let id = as_json(&body)["ID"].as_str().expect("id").to_owned();
        send(&harness.router, post("/whatsapp/session", &create)).await;

        let (status, body) = send(
            &harness.router,
            Request::get("/whatsapp/session/active_users").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let active = as_json(&body);
        assert_eq!(active["active_users"].as_array().map(Vec::len), Some(1));
        assert_eq!(active["active_users"][0]["id"], owner.id.as_str());

        let update_as = |user_id: &str, body: &str| {
            Request::put(format!("/whatsapp/session/{id}"))
                .header(USER_ID_HEADER, user_id)
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .expect("request")
        };
        let closed_at = r#"{"ClosedAt":"2024-06-02T08:30:00Z"}"#;
        let (status, _) = send(&harness.router, update_as(&owner.id, closed_at)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&harness.router, update_as(&admin.id, "{nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).expect("utf8").starts_with("Invalid request body: "));
        let (status, body) = send(&harness.router, update_as(&admin.id, closed_at)).await;
        assert_eq!(status, StatusCode::OK);
        let updated = as_json(&body);
        assert_eq!(updated["ClosedAt"], "2024-06-02T08:30:00Z");
        assert_eq!(updated["UserID"], owner.id.as_str());

        let close_all_as = |user_id: &str| {
            Request::post(format!("/whatsapp/session/by_user/{}/close", owner.id))
                .header(USER_ID_HEADER, user_id)
                .body(Body::empty())
                .expect("request")
        };
        let (status, _) = send(&harness.router, close_all_as(&owner.id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&harness.router, close_all_as(&admin.id)).await;
        assert_eq!(status, StatusCode::OK);
        let closed = as_json(&body);
        assert_eq!(closed["status"], "OK");
        assert_eq!(closed["closed"], 1);
        assert!(closed["closed_at"].is_string());
        let (status, body) = send(&harness.router, close_all_as(&admin.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body), json!({"status": "OK", "closed": 0, "closed_at": null}));

        let delete_as = |user_id: &str| {
            Request::delete(format!("/whatsapp/session/{id}"))
                .header(USER_ID_HEADER, user_id)
                .body(Body::empty())
                .expect("request")
        };
        let (status, _) = send(&harness.router, delete_as(&owner.id)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&harness.router, delete_as(&admin.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body), json!({"status": "OK"}));
        let (status, _) = send(&harness.router, delete_as(&admin.id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let lookup = Request::get(format!("/whatsapp/session/{id}")).body(Body::empty());
        let (status, _) = send(&harness.router, lookup.expect("request")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn close_requires_the_user_header() {
        let harness = harness().await;
        let request =
            Request::post("/whatsapp/session/abc/close").body(Body::empty()).expect("request");
        let (status, body) = send(&harness.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, b"Unauthenticated");
    }

    #[tokio::test]
    async fn create_session_accepts_legacy_field_and_rejects_bad_bodies() {
        let harness = harness().await;

        let (status, body) =
            send(&harness.router, post("/whatsapp/session", r#"{"userID":"U2"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["UserID"], "U2");

        let (status, body) = send(&harness.router, post("/whatsapp/session", "{nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).expect("utf8").starts_with("Invalid request body: "));

        let (status, _) = send(&harness.router, post("/whatsapp/session", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_lookups_by_id_user_and_unclosed() {
        let harness = harness().await;
        let (_, body) =
            send(&harness.router, post("/whatsapp/session", r#"{"user_id":"U3"}"#)).await;
        let id = as_json(&body)["ID"].as_str().expect("id").to_owned();

        let get = |uri: String| Request::get(uri).body(Body::empty()).expect("request");

        let (status, body) = send(&harness.router, get(format!("/whatsapp/session/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["ID"], id.as_str());

        let (status, body) =
            send(&harness.router, get("/whatsapp/session/by_user/U3".to_owned())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["ID"], id.as_str());

        let (status, body) =
            send(&harness.router, get("/whatsapp/session/by_user/nobody".to_owned())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"session not found");

        let (status, body) =
            send(&harness.router, get("/whatsapp/session/unclosed".to_owned())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body).as_array().map(Vec::len), Some(1));

        let (status, _) =
            send(&harness.router, get("/whatsapp/session/missing-id".to_owned())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn channels_require_auth_and_a_channel_id() {
        let harness = harness().await;

        let anonymous = Request::get("/whatsapp/channels").body(Body::empty()).expect("request");
        let (status, _) = send(&harness.router, anonymous).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let member =
            harness.host.add_user(User { username: "m".to_owned(), ..User::default() }).await;
        let guest = harness
            .host
            .add_user(User {
                username: "g".to_owned(),
                roles: "system_guest".to_owned(),
                ..User::default()
            })
            .await;
        let create_as = |user_id: &str, body: &str| {
            Request::post("/whatsapp/channels")
                .header(USER_ID_HEADER, user_id)
                .body(Body::from(body.to_owned()))
                .expect("request")
        };
        let create = |body: &str| create_as(&member.id, body);

        let (status, _) =
            send(&harness.router, create_as(&guest.id, r#"{"channel_id":"ch-1"}"#)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&harness.router, create(r#"{"channel_id":""}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"invalid request body or channel_id missing");

        let (status, body) = send(&harness.router, create(r#"{"channel_id":"ch-1"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["channel_id"], "ch-1");

        let list = Request::get("/whatsapp/channels")
            .header(USER_ID_HEADER, "u1")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(&harness.router, list).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body).as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn webhook_ingests_messages_and_rejects_malformed_json() {
        let harness = harness().await;
        let body = json!({
            "message": {
                "messaging_product": "whatsapp",
                "metadata": {"display_phone_number": "15550002", "phone_number_id": "pn-2"},
                "contacts": [{"profile": {"name": "Grace"}, "wa_id": "4916"}],
                "messages": [{"from": "4916", "id": "m1", "timestamp": "1", "type": "text",
                              "text": {"body": "hello"}}],
                "field": "messages"
            }
        });

        let (status, response) =
            send(&harness.router, post("/whatsapp/webhook", &body.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&response), json!({"status": "OK"}));
        assert!(harness.host.posts().await.iter().any(|post| post.message == "hello"));

        let channels_before = harness.host.channels().await.len();
        let stored_before = harness.state.app().list_channels().await.expect("stored").len();
        let posts_before = harness.host.posts().await.len();
        assert_eq!(stored_before, 1);

        let (status, response) = send(&harness.router, post("/whatsapp/webhook", "[")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(response).expect("utf8").starts_with("Invalid request body"));
        assert_eq!(harness.host.channels().await.len(), channels_before);
        assert_eq!(harness.host.posts().await.len(), posts_before);
        let stored_after = harness.state.app().list_channels().await.expect("stored");
        assert_eq!(stored_after.len(), stored_before);
    }
}

//! Request guards keyed on the trusted user header the host injects.

use axum::http::HeaderMap;
use tracing::error;

use wabridge_core::errors::InterfaceError;
use wabridge_plugin::host::{HostApi, User};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "Mattermost-User-ID";

/// Caller id from the trusted header, empty when the request is anonymous.
pub fn user_id(headers: &HeaderMap) -> &str {
    headers.get(USER_ID_HEADER).and_then(|value| value.to_str().ok()).unwrap_or_default()
}

pub fn require_authenticated(headers: &HeaderMap) -> Result<&str, ApiError> {
    let user_id = user_id(headers);
    if user_id.is_empty() {
        return Err(InterfaceError::Unauthenticated {
            message: "Unauthenticated user".to_owned(),
            correlation_id: "auth".to_owned(),
        }
        .into());
    }
    Ok(user_id)
}

pub async fn disallow_guest(host: &dyn HostApi, user_id: &str) -> Result<User, ApiError> {
    let user = lookup(host, user_id, "disallow_guest").await?;
    if user.is_guest() {
        return Err(InterfaceError::Forbidden {
            message: "Guest users are not permitted to access this resource".to_owned(),
            correlation_id: "auth".to_owned(),
        }
        .into());
    }
    Ok(user)
}

pub async fn require_system_admin(host: &dyn HostApi, user_id: &str) -> Result<User, ApiError> {
    let user = lookup(host, user_id, "require_system_admin").await?;
    if !user.is_system_admin() {
        return Err(InterfaceError::Forbidden {
            message: "Only system admins are permitted to access this resource".to_owned(),
            correlation_id: "auth".to_owned(),
        }
        .into());
    }
    Ok(user)
}

async fn lookup(host: &dyn HostApi, user_id: &str, guard: &str) -> Result<User, ApiError> {
    host.get_user(user_id).await.map_err(|host_error| {
        error!(
            event_name = "server.auth.user_lookup_failed",
            guard,
            user_id,
            error = %host_error,
            "failed to get user from host"
        );
        ApiError::internal(format!("Failed to get user: {host_error}"))
    })
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use wabridge_core::errors::{ApplicationError, DomainError, InterfaceError};

/// Short text error returned to HTTP clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Maps an application failure onto a status code, prefixing the body with `action`.
    ///
    /// Not-found and already-closed failures keep their own short message.
    pub fn from_application(action: &str, error: ApplicationError) -> Self {
        let passthrough = matches!(
            error,
            ApplicationError::Domain(
                DomainError::NotFound { .. } | DomainError::SessionAlreadyClosed(_)
            )
        );
        let interface = error.into_interface(Uuid::new_v4().to_string());
        warn!(
            event_name = "server.request.failed",
            correlation_id = %interface.correlation_id(),
            action,
            error = %interface,
            "request failed"
        );

        let status = status_for(&interface);
        if passthrough {
            return Self::new(status, interface.message());
        }
        Self::new(status, format!("{action}: {}", interface.message()))
    }
}

pub fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let message = match &error {
            InterfaceError::Unauthenticated { .. } | InterfaceError::Forbidden { .. } => {
                error.user_message().to_owned()
            }
            _ => error.message().to_owned(),
        };
        Self::new(status_for(&error), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

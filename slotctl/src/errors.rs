use crate::api::models::operations::{ErrorResponse, Severity};
use crate::operations::InvalidRequest;
use crate::reservations::ReservationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data, rejected before any remote call
    #[error("{message}")]
    BadRequest { message: String },

    /// A reservation service call failed
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Reservation(err) => match err {
                ReservationError::Api { .. } | ReservationError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
                ReservationError::Transport(_) | ReservationError::Credentials(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message. Remote API messages are passed through since they
    /// describe the caller's own project.
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::Reservation(err) => match err {
                ReservationError::Api { message, .. } => message.clone(),
                ReservationError::InvalidResponse(_) => "Invalid response from the reservation API".to_string(),
                ReservationError::Transport(_) => "Failed to reach the reservation API".to_string(),
                ReservationError::Credentials(_) => "Failed to obtain credentials".to_string(),
            },
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. }
            | Error::Reservation(ReservationError::Transport(_) | ReservationError::Credentials(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Reservation(_) => {
                tracing::warn!("Reservation API error: {}", self);
            }
            Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            message: self.user_message(),
            severity: Severity::Error,
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<InvalidRequest> for Error {
    fn from(err: InvalidRequest) -> Self {
        Error::BadRequest { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(error: Error) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_errors_are_bad_requests() {
        let (status, body) = body_json(InvalidRequest::MissingProjectId.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "project_id is required in the json request");
        assert_eq!(body["severity"], "error");
    }

    #[tokio::test]
    async fn test_remote_api_errors_are_bad_gateway() {
        let err = Error::from(ReservationError::Api {
            status: 403,
            code: "PERMISSION_DENIED".to_string(),
            message: "Permission denied on project foobar".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let (_, body) = body_json(err).await;
        assert_eq!(body["message"], "Permission denied on project foobar");
    }

    #[tokio::test]
    async fn test_internal_details_are_not_leaked() {
        let err = Error::from(ReservationError::Credentials("metadata server said 500: secret".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let (_, body) = body_json(err).await;
        assert_eq!(body["message"], "Failed to obtain credentials");

        let err = Error::Internal {
            operation: "read config file /etc/slotctl/secret.yaml".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal server error");
    }
}

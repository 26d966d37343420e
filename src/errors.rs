use crate::{auth::AuthError, services::file_registry::RegistryError};
use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message rendered for anything the client cannot act on.
const INTERNAL_MESSAGE: &str = "internal server error";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// 500 with a generic body; `detail` only goes to the log.
    pub fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!("internal error: {}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Extractor rejection as a JSON error. Input that parsed but did not
    /// deserialize (axum's 422) is reported as 400.
    fn from_rejection(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNPROCESSABLE_ENTITY => Self::bad_request(body),
            status if status.is_server_error() => Self::internal(body),
            status => Self::new(status, body),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unauthenticated => {
                Self::new(StatusCode::UNAUTHORIZED, "authentication required")
            }
            RegistryError::AccessDenied => Self::new(StatusCode::FORBIDDEN, "access denied"),
            RegistryError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "file not found"),
            err @ RegistryError::UnsupportedMediaType(_) => {
                Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
            }
            err @ RegistryError::PayloadTooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            RegistryError::BackendUnavailable(detail) => {
                tracing::warn!("storage unavailable: {}", detail);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage temporarily unavailable",
                )
            }
            RegistryError::ValidationFailed(msg) => Self::bad_request(msg),
            err @ (RegistryError::ConflictOrphan { .. } | RegistryError::Store(_)) => {
                Self::internal(err)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        tracing::debug!("rejected credentials: {}", err);
        RegistryError::Unauthenticated.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::StoreError;
    use http_body_util::BodyExt;
    use uuid::Uuid;

    #[test]
    fn registry_errors_map_to_statuses() {
        let cases = [
            (RegistryError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (RegistryError::AccessDenied, StatusCode::FORBIDDEN),
            (RegistryError::NotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (
                RegistryError::UnsupportedMediaType("application/zip".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                RegistryError::PayloadTooLarge { size: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                RegistryError::BackendUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RegistryError::ValidationFailed("bad page".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::Store(StoreError::Sqlx(sqlx::Error::PoolTimedOut)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[tokio::test]
    async fn internal_detail_is_not_rendered() {
        let err = RegistryError::Store(StoreError::Sqlx(sqlx::Error::Protocol(
            "table files is locked at /var/lib/filevault".into(),
        )));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], INTERNAL_MESSAGE);
        assert_eq!(json["status"], 500);
    }

    #[test]
    fn unprocessable_input_is_a_bad_request() {
        let err = AppError::from_rejection(
            StatusCode::UNPROCESSABLE_ENTITY,
            "isPublic: invalid type".into(),
        );
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "isPublic: invalid type");

        let err = AppError::from_rejection(StatusCode::UNSUPPORTED_MEDIA_TYPE, "json".into());
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err = AppError::from_rejection(StatusCode::INTERNAL_SERVER_ERROR, "no params".into());
        assert_eq!(err.message, INTERNAL_MESSAGE);
    }

    #[test]
    fn backend_detail_is_not_rendered() {
        let err = AppError::from(RegistryError::BackendUnavailable(
            "s3://private-bucket refused connection".into(),
        ));
        assert!(!err.message.contains("private-bucket"));
    }
}

//! Mapping of handler failures to HTTP responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use dyscreen_core::error::ScreeningError;

/// Every way a request can fail, as seen by the client.
#[derive(Debug)]
pub enum AppError {
    /// The body or path could not be decoded.
    InvalidRequest(String),
    /// Missing or rejected bearer token, or no registered user behind it.
    Unauthorized,
    /// The resource does not exist or belongs to someone else.
    NotFound,
    /// Server-side failure; the detail is logged, not returned.
    Internal(&'static str),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFound => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::InvalidRequest(detail) => detail.as_str(),
            AppError::Unauthorized => "missing or invalid credentials",
            AppError::NotFound => "not found",
            AppError::Internal(message) => message,
        };
        let body = Json(json!({ "error": self.code(), "message": message }));
        (self.status(), body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<ScreeningError> for AppError {
    fn from(err: ScreeningError) -> Self {
        match err {
            ScreeningError::NotFound => AppError::NotFound,
            other => {
                tracing::error!("screening request failed: {other}");
                AppError::Internal("could not complete the screening request")
            }
        }
    }
}

/// Turn any error into an [`AppError::Internal`], logging the cause.
pub trait ResultExt<T> {
    fn reject(self, message: &'static str) -> Result<T, AppError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn reject(self, message: &'static str) -> Result<T, AppError> {
        self.map_err(|e| {
            tracing::error!("{message}: {e}");
            AppError::Internal(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyscreen_core::error::StoreError;

    #[test]
    fn screening_errors_map_to_statuses() {
        let not_found: AppError = ScreeningError::NotFound.into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let persist: AppError =
            ScreeningError::SessionPersist(StoreError::Corrupt("bad row".into())).into();
        assert_eq!(persist.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn reject_hides_error_detail() {
        let result: Result<(), String> = Err("disk on fire".into());
        let err = result.reject("could not save").unwrap_err();
        assert!(matches!(err, AppError::Internal("could not save")));
        assert_eq!(err.code(), "INTERNAL_SERVER_ERROR");
    }
}

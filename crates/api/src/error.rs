//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};
use payments::PaymentError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Request could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Domain(err) => err.kind(),
            ApiError::Payment(err) => err.kind(),
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Domain(err) => err.code(),
            ApiError::Payment(err) => err.code(),
            ApiError::BadRequest(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
        }
    }

    fn available(&self) -> Option<u32> {
        match self {
            ApiError::Domain(err) | ApiError::Payment(PaymentError::Domain(err)) => {
                err.available()
            }
            _ => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = serde_json::json!({ "error": message, "code": self.code() });
        if let Some(available) = self.available() {
            body["available"] = available.into();
        }
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderStatus, ProductId};
    use storage::StorageError;

    #[test]
    fn status_follows_kind() {
        let stock = ApiError::from(DomainError::InsufficientStock {
            product_id: ProductId::new(),
            available: 2,
        });
        assert_eq!(stock.status(), StatusCode::BAD_REQUEST);
        assert_eq!(stock.available(), Some(2));

        let terminal = ApiError::from(DomainError::AlreadyTerminal {
            status: OrderStatus::Delivered,
        });
        assert_eq!(terminal.code(), "ALREADY_TERMINAL");

        assert_eq!(
            ApiError::Unauthorized("who".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(DomainError::Storage(StorageError::Injected("db"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

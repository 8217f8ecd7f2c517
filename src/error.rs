// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::database::StoreError;
use crate::service::ServiceError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),

    // 504 Gateway Timeout (a hook ran too long)
    GatewayTimeout(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::GatewayTimeout(_) => 504,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
            ApiError::GatewayTimeout(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });
        if let ApiError::ValidationError {
            field_errors: Some(field_errors),
            ..
        } = self
        {
            response["field_errors"] = json!(field_errors);
        }
        response
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidArgument(msg) => {
                // Programmer error; never shown to clients
                tracing::error!("Invalid argument: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            ServiceError::BadRequest(msg) => ApiError::bad_request(msg),
            ServiceError::Field(field_error) => {
                let mut field_errors = HashMap::new();
                field_errors.insert(field_error.path().to_string(), field_error.to_string());
                ApiError::validation_error(field_error.to_string(), Some(field_errors))
            }
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::MoreThanOneFound(msg) => ApiError::conflict(msg),
            ServiceError::VersionConflict(conflict) => ApiError::conflict(conflict.to_string()),
            ServiceError::HookTimeout { stage, timeout } => {
                tracing::error!("Hook {} timed out after {:?}", stage, timeout);
                ApiError::GatewayTimeout("Request processing timed out".to_string())
            }
            ServiceError::Store(store_error) => store_error.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(msg) => {
                tracing::warn!("Duplicate key: {}", msg);
                ApiError::conflict("A document with the same key already exists")
            }
            StoreError::InvalidArgument(msg) => {
                tracing::error!("Invalid store argument: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            other if other.is_transient() => {
                // Log the real error but return generic message
                tracing::error!("Transient store error: {}", other);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            other => {
                tracing::error!("Store error: {}", other);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldError;
    use crate::service::VersionConflict;

    #[test]
    fn service_errors_map_to_statuses() {
        let err: ApiError = ServiceError::Field(FieldError::UnknownField { path: "extra".into() }).into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_json()["field_errors"]["extra"], "Unknown field 'extra'");

        let err: ApiError = ServiceError::VersionConflict(VersionConflict::Modified {
            document_version: 2,
            supplied_version: 0,
        })
        .into();
        assert_eq!(err.status_code(), 409);

        let err: ApiError = ServiceError::NotFound("gone".into()).into();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn internal_details_are_not_echoed() {
        let err: ApiError = ServiceError::invalid_argument("query must be a document").into();
        assert_eq!(err.status_code(), 500);
        assert!(!err.message().contains("query"));

        let err: ApiError = ServiceError::Store(StoreError::driver("socket closed")).into();
        assert_eq!(err.status_code(), 500);
        assert!(!err.message().contains("socket"));
    }
}

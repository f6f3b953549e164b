//! Request validation and the gateway's error envelope.
//!
//! Every failure leaves the gateway as `{"success": false, "error": "..."}`
//! with the status the failing component mapped it to.

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;

use prompt_loop::LoopError;
use self_heal::SelfHealError;

/// Maximum request payload size (2MB); long call transcripts fit comfortably.
pub const MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Content type must be {0}")]
    ContentType(String),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error(transparent)]
    SelfHeal(#[from] SelfHealError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let code = match self {
            Self::BadRequest(_) => 400,
            Self::ContentType(_) => 415,
            Self::Loop(err) => err.status_code(),
            Self::SelfHeal(err) => err.status_code(),
            Self::Encode(_) => 500,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

/// `{"success": true, ...body}`. Non-object bodies are nested under `data`.
pub fn success<T: Serialize>(body: &T) -> Result<Response, ApiError> {
    let mut envelope = match serde_json::to_value(body)? {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    envelope.insert("success".to_string(), Value::Bool(true));
    Ok((StatusCode::OK, Json(Value::Object(envelope))).into_response())
}

pub fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::BadRequest(format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Validate the Content-Type header
pub fn validate_content_type(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !content_type.starts_with(expected) {
        return Err(ApiError::ContentType(format!(
            "'{expected}', got '{content_type}'"
        )));
    }
    Ok(())
}

/// POST bodies must be JSON.
pub async fn json_content_type_middleware(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::POST {
        if let Err(err) = validate_content_type(req.headers(), "application/json") {
            return err.into_response();
        }
    }
    next.run(req).await
}

pub fn payload_limit_config() -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE)
}

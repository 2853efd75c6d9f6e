//! JSON responses and the error envelope.
//!
//! Every error leaves the service as
//! `{"meta": {"message": ..., "debug_id": ..., "errors": [...], "code": ...}}`
//! where `debug_id` is the request ID when one is known.

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::request::X_REQUEST_ID;

/// One field- or rule-level problem inside an error response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
    pub code: u16,
}

/// The error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub meta: Meta,
}

/// An error ready to be rendered as the JSON envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                meta: Meta {
                    message: message.into(),
                    debug_id: None,
                    errors: Vec::new(),
                    code: status.as_u16(),
                },
            },
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Use the request ID from `headers`, if any, as the debug ID.
    pub fn with_request_id(mut self, headers: &HeaderMap) -> Self {
        self.body.meta.debug_id = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.body.meta.errors = details;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Serialize `value` with the given status; `None` renders as `{}`.
pub fn json_with_code<T: Serialize>(status: StatusCode, value: Option<T>) -> Response {
    match value {
        Some(value) => (status, Json(value)).into_response(),
        None => (status, Json(serde_json::json!({}))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn error_envelope_shape() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-42"));

        let response = ApiError::new(StatusCode::BAD_REQUEST, "invalid payload")
            .with_request_id(&headers)
            .with_details(vec![ErrorDetail {
                field: Some("email".into()),
                message: Some("must not be empty".into()),
                ..Default::default()
            }])
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "meta": {
                    "message": "invalid payload",
                    "debug_id": "req-42",
                    "errors": [{"field": "email", "message": "must not be empty"}],
                    "code": 400
                }
            })
        );
    }

    #[tokio::test]
    async fn empty_payload_renders_as_object() {
        let response = json_with_code::<()>(StatusCode::ACCEPTED, None);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await, serde_json::json!({}));
    }
}

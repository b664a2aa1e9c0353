use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Upstream request failed")]
    Upstream { status: StatusCode, body: String },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn upstream(status: StatusCode, body: String) -> Self {
        Self::Upstream { status, body }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, message, "invalid_request_error")
                    .into_response()
            }
            Self::ModelNotFound(model) => error_response(
                StatusCode::NOT_FOUND,
                format!("Model not found: {model}"),
                "not_found_error",
            )
            .into_response(),
            Self::NotImplemented(message) => error_response(
                StatusCode::NOT_IMPLEMENTED,
                message,
                "not_implemented_error",
            )
            .into_response(),
            Self::Upstream { status, body } => {
                if let Ok(value) = serde_json::from_str::<Value>(&body) {
                    return (status, Json(value)).into_response();
                }

                let message = if body.trim().is_empty() {
                    format!("Upstream provider returned {}", status)
                } else {
                    body
                };
                error_response(status, message, "upstream_error").into_response()
            }
            Self::Transport(_) => error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to reach upstream provider".to_string(),
                "upstream_error",
            )
            .into_response(),
            Self::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, message, "internal_error")
                    .into_response()
            }
        }
    }
}

fn error_response(
    status: StatusCode,
    message: String,
    error_type: &'static str,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                message,
                error_type: error_type.to_string(),
            },
        }),
    )
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

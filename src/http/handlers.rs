use std::io;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::{Value, json};

use crate::config::WireFormat;
use crate::error::GatewayError;
use crate::http::state::AppState;
use crate::proxy::ProxyReply;

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "llm-gateway",
        "status": "ok"
    }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let data = state
        .resolver
        .list_all()
        .into_iter()
        .map(|listing| {
            json!({
                "id": listing.name,
                "object": "model",
                "owned_by": listing.provider_name,
                "provider_kind": listing.provider_kind,
                "model_id": listing.model_id,
            })
        })
        .collect::<Vec<_>>();

    Json(json!({
        "object": "list",
        "data": data,
    }))
}

/// Anthropic-shaped endpoint.
pub async fn messages(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, GatewayError> {
    proxy(state, payload, WireFormat::Anthropic).await
}

/// OpenAI-shaped endpoint.
pub async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, GatewayError> {
    proxy(state, payload, WireFormat::OpenAi).await
}

async fn proxy(
    state: AppState,
    payload: Result<Json<Value>, JsonRejection>,
    client_format: WireFormat,
) -> Result<Response, GatewayError> {
    let Json(payload) =
        payload.map_err(|_| GatewayError::BadRequest("Invalid JSON request body".to_string()))?;

    if payload.get("messages").and_then(Value::as_array).is_none() {
        return Err(GatewayError::BadRequest(
            "The request body must include messages".to_string(),
        ));
    }

    match state.dispatcher.handle(payload, client_format).await? {
        ProxyReply::Json(body) => Ok(Json(body).into_response()),
        ProxyReply::Stream(stream) => {
            let body_stream =
                stream.map(|item| item.map_err(|error| io::Error::other(error.to_string())));

            let mut response = Response::new(Body::from_stream(body_stream));
            *response.status_mut() = StatusCode::OK;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            response.headers_mut().insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );

            Ok(response)
        }
    }
}

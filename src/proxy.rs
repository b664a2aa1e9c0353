use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::config::WireFormat;
use crate::credentials::CredentialProvider;
use crate::error::GatewayError;
use crate::logger::{CallLogger, CallRecord};
use crate::resolver::{ModelResolver, ResolvedModel};
use crate::translate::{request, response, stream};

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

pub enum ProxyReply {
    Json(Value),
    Stream(ProviderStream),
}

/// Orchestrates one proxied call: resolve the model, pick the backend
/// target, translate if the client and backend wire formats differ, forward,
/// and hand the outcome to the call logger.
pub struct ProxyDispatcher {
    client: reqwest::Client,
    resolver: Arc<ModelResolver>,
    credentials: Arc<dyn CredentialProvider>,
    logger: Arc<dyn CallLogger>,
    copilot_account_tier: String,
}

impl ProxyDispatcher {
    pub fn new(
        client: reqwest::Client,
        resolver: Arc<ModelResolver>,
        credentials: Arc<dyn CredentialProvider>,
        logger: Arc<dyn CallLogger>,
        copilot_account_tier: String,
    ) -> Self {
        Self {
            client,
            resolver,
            credentials,
            logger,
            copilot_account_tier,
        }
    }

    /// Both the translated and the passthrough path rewrite the request's
    /// `model` field to the resolved catalog id, not merely the normalized
    /// name: aliased catalog entries only resolve to a real backend model
    /// that way, and for list catalogs the two are the same string.
    pub async fn handle(
        &self,
        mut body: Value,
        client_format: WireFormat,
    ) -> Result<ProxyReply, GatewayError> {
        let started = Instant::now();

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.resolver.default_model().map(str::to_string))
            .ok_or_else(|| {
                GatewayError::BadRequest("The request body must include a model".to_string())
            })?;

        let resolved = self
            .resolver
            .resolve(&model)
            .ok_or_else(|| GatewayError::ModelNotFound(model.clone()))?;
        let target_format = resolved.kind.wire_format();

        if client_format == WireFormat::OpenAi && target_format == WireFormat::Anthropic {
            // Deliberately unsupported rather than approximated.
            return Err(GatewayError::NotImplemented(
                "Translating OpenAI-format requests to an Anthropic backend is not supported"
                    .to_string(),
            ));
        }

        let translate = client_format == WireFormat::Anthropic && target_format == WireFormat::OpenAi;
        let streaming = body
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let request_body = if translate {
            let mut translated = request::anthropic_to_openai(&body)?;
            translated["model"] = json!(resolved.model_id);
            translated
        } else {
            body["model"] = json!(resolved.model_id);
            body
        };

        let (base_url, headers) = self.backend_target(&resolved).await?;
        let url = endpoint(&base_url, target_format);

        let record = CallRecord {
            client_format: client_format.id(),
            model: model.clone(),
            provider: resolved.provider_name.clone(),
            status: 0,
            stream: streaming,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        };

        let sent = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request_body)
            .send()
            .await;

        let upstream_response = match sent {
            Ok(response) => response,
            Err(error) => {
                self.spawn_log(finish_record(
                    record,
                    StatusCode::BAD_GATEWAY.as_u16(),
                    0,
                    0,
                    started,
                ));
                return Err(GatewayError::Transport(error));
            }
        };

        let status = upstream_response.status();
        if !status.is_success() {
            let text = upstream_response.text().await.unwrap_or_default();
            self.spawn_log(finish_record(record, status.as_u16(), 0, 0, started));
            return Err(GatewayError::upstream(status, text));
        }

        if streaming {
            let upstream: ProviderStream = Box::pin(
                upstream_response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(GatewayError::from)),
            );

            if translate {
                let logger = Arc::clone(&self.logger);
                let status = status.as_u16();
                let transcoded =
                    stream::transcode_sse(upstream, model, move |input_tokens, output_tokens| {
                        let record =
                            finish_record(record, status, input_tokens, output_tokens, started);
                        tokio::spawn(async move { logger.log_call(record).await });
                    });
                return Ok(ProxyReply::Stream(transcoded));
            }

            // Formats already match; usage stays inside the relayed bytes,
            // so the record carries zero tokens.
            let logger = Arc::clone(&self.logger);
            let status = status.as_u16();
            let relayed = relay_sse(upstream, client_format, move || {
                let record = finish_record(record, status, 0, 0, started);
                tokio::spawn(async move { logger.log_call(record).await });
            });
            return Ok(ProxyReply::Stream(relayed));
        }

        let text = upstream_response.text().await?;
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|_| GatewayError::Internal("Upstream returned invalid JSON".to_string()))?;

        let reply = if translate {
            response::openai_to_anthropic(&parsed, Some(&model))
        } else {
            parsed
        };

        let (input_tokens, output_tokens) = extract_usage(&reply, client_format);
        self.spawn_log(finish_record(
            record,
            status.as_u16(),
            input_tokens,
            output_tokens,
            started,
        ));

        Ok(ProxyReply::Json(reply))
    }

    /// Resolves `(base_url, headers)` for the backend. Copilot providers
    /// obtain both from the credential collaborator; OpenAI providers get
    /// bearer auth against their configured base; everything else is treated
    /// as Anthropic-style with the version header.
    async fn backend_target(
        &self,
        resolved: &ResolvedModel,
    ) -> Result<(String, HeaderMap), GatewayError> {
        use crate::config::ProviderKind;

        match resolved.kind {
            ProviderKind::Copilot => {
                let headers = self.credentials.get_headers().await?;
                let base_url = self.credentials.get_base_url(&self.copilot_account_tier);
                Ok((base_url, headers))
            }
            ProviderKind::OpenAi => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(
                    AUTHORIZATION,
                    bearer_value(resolved.api_key.as_deref(), &resolved.provider_name)?,
                );
                let base_url = resolved
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
                Ok((base_url, headers))
            }
            ProviderKind::Anthropic => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(
                    AUTHORIZATION,
                    bearer_value(resolved.api_key.as_deref(), &resolved.provider_name)?,
                );
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
                let base_url = resolved
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string());
                Ok((base_url, headers))
            }
        }
    }

    fn spawn_log(&self, record: CallRecord) {
        let logger = Arc::clone(&self.logger);
        tokio::spawn(async move { logger.log_call(record).await });
    }
}

fn endpoint(base_url: &str, target_format: WireFormat) -> String {
    let path = match target_format {
        WireFormat::OpenAi => "chat/completions",
        WireFormat::Anthropic => "v1/messages",
    };
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

fn bearer_value(api_key: Option<&str>, provider: &str) -> Result<HeaderValue, GatewayError> {
    let api_key = api_key.ok_or_else(|| {
        GatewayError::Internal(format!("Provider {provider} has no api_key configured"))
    })?;
    HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| GatewayError::Internal(format!("Provider {provider} has an invalid api_key")))
}

fn finish_record(
    mut record: CallRecord,
    status: u16,
    input_tokens: u64,
    output_tokens: u64,
    started: Instant,
) -> CallRecord {
    record.status = status;
    record.input_tokens = input_tokens;
    record.output_tokens = output_tokens;
    record.duration_ms = started.elapsed().as_millis() as u64;
    record
}

fn extract_usage(reply: &Value, client_format: WireFormat) -> (u64, u64) {
    let usage = reply.get("usage").unwrap_or(&Value::Null);
    let (input_field, output_field) = match client_format {
        WireFormat::Anthropic => ("input_tokens", "output_tokens"),
        WireFormat::OpenAi => ("prompt_tokens", "completion_tokens"),
    };
    (
        usage.get(input_field).and_then(Value::as_u64).unwrap_or(0),
        usage.get(output_field).and_then(Value::as_u64).unwrap_or(0),
    )
}

/// Verbatim relay for format-matched streams. A mid-stream backend failure
/// becomes one terminal error frame in the client's own SSE dialect instead
/// of an abrupt close. `on_done` runs once the relay ends, so the call record
/// covers the full stream duration; if the client disconnects first the
/// generator is dropped and the hook never runs, leaving the call unlogged.
fn relay_sse(
    upstream: ProviderStream,
    client_format: WireFormat,
    on_done: impl FnOnce() + Send + 'static,
) -> ProviderStream {
    let stream = try_stream! {
        futures_util::pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => yield bytes,
                Err(error) => {
                    let payload = json!({
                        "type": "error",
                        "error": {"type": "api_error", "message": error.to_string()},
                    });
                    let frame = match client_format {
                        WireFormat::Anthropic => format!("event: error\ndata: {payload}\n\n"),
                        WireFormat::OpenAi => format!("data: {payload}\n\n"),
                    };
                    yield Bytes::from(frame);
                    break;
                }
            }
        }

        on_done();
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelCatalog, ProviderConfig, ProviderFile, ProviderKind};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct NoCredentials;

    #[async_trait]
    impl CredentialProvider for NoCredentials {
        async fn get_headers(&self) -> Result<HeaderMap, GatewayError> {
            Err(GatewayError::Internal("no credentials in tests".to_string()))
        }

        fn get_base_url(&self, _account_tier: &str) -> String {
            "https://api.githubcopilot.com".to_string()
        }
    }

    struct NullLogger;

    #[async_trait]
    impl CallLogger for NullLogger {
        async fn log_call(&self, _record: CallRecord) {}
    }

    fn dispatcher() -> ProxyDispatcher {
        let providers = vec![
            ProviderConfig {
                name: "openai".to_string(),
                kind: ProviderKind::OpenAi,
                base_url: None,
                api_key: Some("sk-test".to_string()),
                models: ModelCatalog::List(vec!["gpt-4o".to_string()]),
            },
            ProviderConfig {
                name: "anthropic".to_string(),
                kind: ProviderKind::Anthropic,
                base_url: None,
                api_key: Some("sk-ant-test".to_string()),
                models: ModelCatalog::Aliased(BTreeMap::from([(
                    "sonnet".to_string(),
                    "claude-sonnet-4-20250514".to_string(),
                )])),
            },
        ];
        let resolver = Arc::new(ModelResolver::new(ProviderFile {
            default_model: Some("gpt-4o".to_string()),
            providers,
        }));

        ProxyDispatcher::new(
            reqwest::Client::new(),
            resolver,
            Arc::new(NoCredentials),
            Arc::new(NullLogger),
            "individual".to_string(),
        )
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let result = dispatcher()
            .handle(json!({"model": "llama-3", "messages": []}), WireFormat::OpenAi)
            .await;
        assert!(matches!(result, Err(GatewayError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn openai_client_against_anthropic_backend_is_refused() {
        let result = dispatcher()
            .handle(json!({"model": "sonnet", "messages": []}), WireFormat::OpenAi)
            .await;
        assert!(matches!(result, Err(GatewayError::NotImplemented(_))));
    }

    #[tokio::test]
    async fn missing_model_without_default_is_a_bad_request() {
        let resolver = Arc::new(ModelResolver::new(ProviderFile {
            default_model: None,
            providers: Vec::new(),
        }));
        let dispatcher = ProxyDispatcher::new(
            reqwest::Client::new(),
            resolver,
            Arc::new(NoCredentials),
            Arc::new(NullLogger),
            "individual".to_string(),
        );

        let result = dispatcher
            .handle(json!({"messages": []}), WireFormat::OpenAi)
            .await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn backend_target_builds_provider_specific_headers() {
        let dispatcher = dispatcher();

        let openai = ResolvedModel {
            provider_name: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            base_url: None,
            api_key: Some("sk-test".to_string()),
            model_id: "gpt-4o".to_string(),
        };
        let (base_url, headers) = dispatcher.backend_target(&openai).await.unwrap();
        assert_eq!(base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert!(headers.get("anthropic-version").is_none());

        let anthropic = ResolvedModel {
            provider_name: "anthropic".to_string(),
            kind: ProviderKind::Anthropic,
            base_url: Some("https://example.com/".to_string()),
            api_key: Some("sk-ant-test".to_string()),
            model_id: "claude-sonnet-4".to_string(),
        };
        let (base_url, headers) = dispatcher.backend_target(&anthropic).await.unwrap();
        assert_eq!(base_url, "https://example.com/");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
    }

    #[test]
    fn endpoint_paths_are_format_specific() {
        assert_eq!(
            endpoint("https://api.openai.com/v1", WireFormat::OpenAi),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("https://api.anthropic.com/", WireFormat::Anthropic),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn usage_extraction_follows_client_format() {
        let anthropic = json!({"usage": {"input_tokens": 3, "output_tokens": 9}});
        assert_eq!(extract_usage(&anthropic, WireFormat::Anthropic), (3, 9));

        let openai = json!({"usage": {"prompt_tokens": 4, "completion_tokens": 8}});
        assert_eq!(extract_usage(&openai, WireFormat::OpenAi), (4, 8));

        assert_eq!(extract_usage(&json!({}), WireFormat::OpenAi), (0, 0));
    }

    use std::sync::atomic::{AtomicBool, Ordering};

    async fn collect_frames(mut stream: ProviderStream) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(chunk) = stream.next().await {
            frames.push(String::from_utf8(chunk.unwrap().to_vec()).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn relay_turns_midstream_failure_into_client_dialect_error_frame() {
        for (client_format, error_prefix) in [
            (WireFormat::Anthropic, "event: error\ndata: "),
            (WireFormat::OpenAi, "data: {\"error\""),
        ] {
            let upstream: ProviderStream = Box::pin(futures_util::stream::iter(vec![
                Ok(Bytes::from("data: {\"ok\":true}\n\n")),
                Err(GatewayError::Internal("connection reset".to_string())),
                Ok(Bytes::from("data: late\n\n")),
            ]));

            let frames = collect_frames(relay_sse(upstream, client_format, || {})).await;

            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0], "data: {\"ok\":true}\n\n");
            assert!(frames[1].starts_with(error_prefix));
            assert!(frames[1].contains("connection reset"));
        }
    }

    #[tokio::test]
    async fn relay_completion_hook_runs_after_last_frame() {
        let logged = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&logged);

        let upstream: ProviderStream = Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from(
            "data: [DONE]\n\n",
        ))]));
        let mut relayed = relay_sse(upstream, WireFormat::OpenAi, move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(relayed.next().await.is_some());
        assert!(!logged.load(Ordering::SeqCst));
        assert!(relayed.next().await.is_none());
        assert!(logged.load(Ordering::SeqCst));
    }
}

use async_trait::async_trait;
use tracing::info;

/// Summary of one completed proxied call, success or backend error.
#[derive(Clone, Debug)]
pub struct CallRecord {
    pub client_format: &'static str,
    pub model: String,
    pub provider: String,
    pub status: u16,
    pub stream: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Fire-and-forget call sink. Implementations swallow their own failures;
/// nothing reported here may ever alter the response sent to the client.
#[async_trait]
pub trait CallLogger: Send + Sync {
    async fn log_call(&self, record: CallRecord);
}

pub struct TracingCallLogger;

#[async_trait]
impl CallLogger for TracingCallLogger {
    async fn log_call(&self, record: CallRecord) {
        info!(
            client_format = record.client_format,
            model = %record.model,
            provider = %record.provider,
            status = record.status,
            stream = record.stream,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            duration_ms = record.duration_ms,
            "proxied call",
        );
    }
}

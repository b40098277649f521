//! Upstream LLM client.
//!
//! Grounded directly on the reference kernel's `LlmClient` in `llm.rs`: one
//! pooled `reqwest::Client`, JSON in/out, no retries. Generalized from the
//! fixed KILL/SUSTAIN prompt into a pass-through chat-completion forwarder,
//! and from `Box<dyn Error>` into the typed `ClientError` taxonomy so the
//! HTTP layer can map failures to status codes without string matching.

use std::time::Duration;

use tracing::warn;

use crate::error::ClientError;
use crate::model::{ChatRequest, CompletionResponse};

pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(None)
            .tcp_nodelay(true)
            .timeout(timeout)
            .build()
            .expect("failed to build upstream LLM HTTP client");

        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            timeout,
        }
    }

    /// Forward the (possibly rewritten) request. No retries; rate-limit
    /// errors are surfaced rather than absorbed.
    pub async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse, ClientError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("upstream LLM call timed out after {:?}", self.timeout);
                ClientError::Timeout(self.timeout)
            } else {
                ClientError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ProviderError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, Role};

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: Some("test-model".to_string()),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".to_string(),
            }],
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_surfaces_transport_error() {
        let client = LlmClient::new("http://127.0.0.1:1", None, Duration::from_millis(200));
        let result = client.complete(&sample_request()).await;
        assert!(result.is_err());
    }
}

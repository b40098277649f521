//! Sieve client: external compression service.
//!
//! Built the way `llm.rs`'s `LlmClient` is: one `reqwest::Client`
//! constructed once with an explicit timeout, JSON in/out, no retries. Unlike
//! the upstream LLM client, failures here are never surfaced to the caller as
//! an error type the HTTP layer has to map. `compress` always returns a
//! best-effort result, because the contract is "fail-open to the original
//! text".

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize)]
struct SieveRequest<'a> {
    text: &'a str,
    level: f64,
}

#[derive(Debug, Deserialize, Serialize)]
struct SieveResponse {
    compressed_text: String,
    tokens_saved_estimate: i64,
}

/// Outcome of a sieve call, already degraded to the fail-open shape the
/// pipeline needs: no `Result` to match on, just "did it help".
pub struct SieveOutcome {
    pub text: String,
    pub tokens_saved: i64,
}

pub struct SieveClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SieveClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build sieve HTTP client");
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }

    /// Called at most once per request, only when the pipeline decides to
    /// compress. Any timeout, non-2xx, or unparseable body degrades to the
    /// original text with `tokens_saved = 0`.
    pub async fn compress(&self, text: &str, level: f64) -> SieveOutcome {
        let fallback = || SieveOutcome {
            text: text.to_string(),
            tokens_saved: 0,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .json(&SieveRequest { text, level })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("sieve request failed, falling back to original text: {e}");
                return fallback();
            }
        };

        if !response.status().is_success() {
            warn!("sieve returned non-2xx {}, falling back to original text", response.status());
            return fallback();
        }

        let parsed = match response.json::<SieveResponse>().await {
            Ok(p) => p,
            Err(e) => {
                warn!("sieve response malformed, falling back to original text: {e}");
                return fallback();
            }
        };

        let tokens_saved = parsed.tokens_saved_estimate.max(0);

        // Negative/zero savings, or a compressed form longer than the
        // original, both fall back to the original text.
        if tokens_saved <= 0 || parsed.compressed_text.len() >= text.len() {
            return fallback();
        }

        SieveOutcome {
            text: parsed.compressed_text,
            tokens_saved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post as axum_post;
    use axum::{Json, Router};

    #[tokio::test]
    async fn unreachable_endpoint_falls_back_to_original() {
        // Port 1 on loopback is reserved and will refuse the connection immediately.
        let client = SieveClient::new("http://127.0.0.1:1/compress", Duration::from_millis(200));
        let outcome = client.compress("hello world", 0.5).await;
        assert_eq!(outcome.text, "hello world");
        assert_eq!(outcome.tokens_saved, 0);
    }

    #[derive(serde::Deserialize)]
    struct IncomingSieveRequest {
        text: String,
        #[allow(dead_code)]
        level: f64,
    }

    async fn handle_compress(Json(req): Json<IncomingSieveRequest>) -> Json<SieveResponse> {
        // Echo back a drastically shortened form, simulating a token-stuffing
        // payload being collapsed to its meaningful remainder.
        Json(SieveResponse {
            compressed_text: req.text.split_whitespace().last().unwrap_or("").to_string(),
            tokens_saved_estimate: 400,
        })
    }

    async fn spawn_mock_sieve() -> String {
        let router = Router::new().route("/compress", axum_post(handle_compress));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/compress")
    }

    #[tokio::test]
    async fn successful_compression_reports_tokens_saved() {
        let endpoint = spawn_mock_sieve().await;
        let client = SieveClient::new(&endpoint, Duration::from_secs(5));

        let noisy: String = (0..500)
            .map(|i| format!("noise-{i} "))
            .collect::<String>()
            + "What is 2+2?";
        let outcome = client.compress(&noisy, 0.7).await;

        assert_eq!(outcome.tokens_saved, 400);
        assert!(outcome.text.len() < noisy.len());
    }
}

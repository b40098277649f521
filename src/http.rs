//! HTTP adapter: the `axum` router exposing `/` and `/v1/chat/completions`.
//! Built the way `scoootscooob-aegis-protocol/indexer/src/api.rs` builds its
//! router, `Router::new().route(...).layer(cors).with_state(...)`, plus a
//! `catch_panic` layer so a single bad request can't take the listener down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::audit::AuditTrail;
use crate::config::ShieldConfig;
use crate::error::ShieldError;
use crate::fingerprint::CallerIdentity;
use crate::llm::LlmClient;
use crate::model::{ChatRequest, Decision, ReasonKind};
use crate::pipeline::Pipeline;

pub struct ShieldState {
    pub config: Arc<ShieldConfig>,
    pub pipeline: Pipeline,
    pub llm: LlmClient,
    pub audit: AuditTrail,
}

pub fn build_router(state: Arc<ShieldState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Matches the `{detail: string}` shape every other error path on this
/// router returns, instead of the default plain-text panic body.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!("request handler panicked: {detail}");
    (
        ReasonKind::InternalError.status_code(),
        Json(json!({ "detail": detail })),
    )
        .into_response()
}

#[derive(Serialize)]
struct IndexResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        status: "ok",
        service: "llm-shield",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn caller_identity(headers: &HeaderMap, peer: SocketAddr) -> CallerIdentity {
    let user_id = headers
        .get("X-User-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let peer_addr = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string());

    CallerIdentity { user_id, peer_addr }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

async fn chat_completions(
    State(state): State<Arc<ShieldState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    let identity = caller_identity(&headers, peer);
    let now = now_seconds();

    let decision = state.pipeline.decide(&request, &identity, now).await;

    match decision {
        Decision::Block { reason, message, metadata } => {
            let latency_ms = start.elapsed().as_millis() as u64;
            let target = request
                .target_index()
                .or_else(|| request.target_index_lenient())
                .map(|i| request.messages[i].content.clone())
                .unwrap_or_default();

            let fp = crate::fingerprint::fingerprint(&identity);
            if let Err(e) = state
                .audit
                .record(&fp.to_string(), &target, reason.as_str(), &metadata, latency_ms)
            {
                warn!("failed to write audit record: {e}");
            }

            warn!("blocked request: {} ({})", message, reason.as_str());
            (reason.status_code(), Json(json!({ "detail": message }))).into_response()
        }
        Decision::Allow { rewritten, metadata } => {
            let result = state.llm.complete(&rewritten).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let target = rewritten
                .target_index()
                .or_else(|| rewritten.target_index_lenient())
                .map(|i| rewritten.messages[i].content.clone())
                .unwrap_or_default();
            let fp = crate::fingerprint::fingerprint(&identity);

            match result {
                Ok(completion) => {
                    state
                        .pipeline
                        .record_token_cost(&identity, completion.usage.total_tokens, now);

                    if let Err(e) =
                        state.audit.record(&fp.to_string(), &target, "ALLOW", &metadata, latency_ms)
                    {
                        warn!("failed to write audit record: {e}");
                    }

                    info!("allowed request, {} tokens used", completion.usage.total_tokens);
                    let mut body = serde_json::to_value(&completion).unwrap_or_else(|_| json!({}));
                    if let serde_json::Value::Object(ref mut map) = body {
                        map.insert(
                            "llm_shield".to_string(),
                            serde_json::to_value(&metadata).unwrap_or(serde_json::Value::Null),
                        );
                    }
                    (StatusCode::OK, Json(body)).into_response()
                }
                Err(client_err) => {
                    let shield_err = map_client_error(client_err);
                    if let Err(e) = state.audit.record(
                        &fp.to_string(),
                        &target,
                        shield_err.reason_kind().as_str(),
                        &metadata,
                        latency_ms,
                    ) {
                        warn!("failed to write audit record: {e}");
                    }
                    error!("upstream LLM call failed: {shield_err}");
                    (shield_err.status_code(), Json(json!({ "detail": shield_err.to_string() }))).into_response()
                }
            }
        }
    }
}

fn map_client_error(err: crate::error::ClientError) -> ShieldError {
    use crate::error::ClientError;
    match err {
        ClientError::RateLimited(body) => ShieldError::UpstreamRateLimit(body),
        ClientError::Timeout(d) => ShieldError::UpstreamError(format!("timed out after {d:?}")),
        ClientError::ProviderError { status, body } if status == 429 => {
            ShieldError::UpstreamRateLimit(body)
        }
        ClientError::ProviderError { status, body } => {
            ShieldError::UpstreamError(format!("{status}: {body}"))
        }
        ClientError::Transport(e) => ShieldError::UpstreamError(e.to_string()),
        ClientError::MalformedResponse(e) => ShieldError::UpstreamError(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_response_serializes() {
        let resp = IndexResponse {
            status: "ok",
            service: "llm-shield",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"service\":\"llm-shield\""));
    }

    #[test]
    fn caller_identity_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.5, 10.0.0.1".parse().unwrap());
        headers.insert("X-User-ID", "alice".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let identity = caller_identity(&headers, peer);
        assert_eq!(identity.user_id.as_deref(), Some("alice"));
        assert_eq!(identity.peer_addr, "203.0.113.5");
    }

    #[test]
    fn caller_identity_falls_back_to_peer_addr() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let identity = caller_identity(&headers, peer);
        assert_eq!(identity.user_id, None);
        assert_eq!(identity.peer_addr, "127.0.0.1:9000");
    }
}

//! Error taxonomy for the shield.
//!
//! The pipeline's own rejections carry a `ReasonKind` and a plain message
//! directly (see `model::Decision::Block`); `ShieldError` exists only to give
//! the upstream LLM call's failure modes, once normalized out of
//! `ClientError`, the same `{detail: ...}` HTTP shape every other error path
//! uses.

use axum::http::StatusCode;
use thiserror::Error;

use crate::model::ReasonKind;

#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Upstream rate limit or quota exceeded: {0}")]
    UpstreamRateLimit(String),

    #[error("Upstream LLM error: {0}")]
    UpstreamError(String),
}

impl ShieldError {
    pub fn reason_kind(&self) -> ReasonKind {
        match self {
            ShieldError::UpstreamRateLimit(_) => ReasonKind::UpstreamRateLimit,
            ShieldError::UpstreamError(_) => ReasonKind::UpstreamError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.reason_kind().status_code()
    }
}

/// Narrow taxonomy the LLM/judge/sieve clients normalize provider errors into.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider returned {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

//! Wire types for the chat-completion surface and the shield's own metadata.
//!
//! These mirror the shape of a standard chat-completion API so the proxy is a
//! drop-in replacement from the caller's point of view; the only addition is
//! the `llm_shield` key merged into the 200 response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl ChatRequest {
    /// The last message with `role = user`, per the strict default rule.
    pub fn target_index(&self) -> Option<usize> {
        match self.messages.last() {
            Some(m) if m.role == Role::User => Some(self.messages.len() - 1),
            _ => None,
        }
    }

    /// Same lookup under the lenient rule: last user-role message anywhere.
    pub fn target_index_lenient(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == Role::User)
    }

    pub fn with_rewritten_target(&self, index: usize, content: String) -> ChatRequest {
        let mut rewritten = self.clone();
        rewritten.messages[index].content = content;
        rewritten
    }
}

/// Three-valued entropy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Clean,
    Suspicious,
    Weird,
}

/// Binary compression-savings signal from the compression stage, distinct
/// from `ThreatLevel`. These two are never conflated: a request can be CLEAN
/// and still carry a HIGH attack probability (a token-stuffing payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttackProbability {
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldMetadata {
    pub threat_level: ThreatLevel,
    pub entropy_score: f64,
    pub attack_probability: AttackProbability,
    pub tokens_saved: i64,
    pub savings_pct: f64,
    pub evaluator_validated: bool,
    pub evaluator_score: f64,
    pub compression_level: f64,
    pub user_penalty_applied: bool,
}

impl ShieldMetadata {
    /// Defaults used for the fields a Block decision never reaches.
    pub fn defaults() -> Self {
        Self {
            threat_level: ThreatLevel::Clean,
            entropy_score: 0.0,
            attack_probability: AttackProbability::Low,
            tokens_saved: 0,
            savings_pct: 0.0,
            evaluator_validated: true,
            evaluator_score: 0.0,
            compression_level: 0.5,
            user_penalty_applied: false,
        }
    }
}

/// Why a request was rejected; doubles as the HTTP status mapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonKind {
    BadRequest,
    EntropyWeird,
    SecurityHijack,
    SecurityOverride,
    JudgeRejected,
    UpstreamRateLimit,
    UpstreamError,
    InternalError,
}

impl ReasonKind {
    pub fn status_code(self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ReasonKind::BadRequest | ReasonKind::EntropyWeird => StatusCode::BAD_REQUEST,
            ReasonKind::SecurityHijack | ReasonKind::SecurityOverride | ReasonKind::JudgeRejected => {
                StatusCode::FORBIDDEN
            }
            ReasonKind::UpstreamRateLimit => StatusCode::TOO_MANY_REQUESTS,
            ReasonKind::UpstreamError => StatusCode::BAD_GATEWAY,
            ReasonKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonKind::BadRequest => "BadRequest",
            ReasonKind::EntropyWeird => "EntropyWeird",
            ReasonKind::SecurityHijack => "SecurityHijack",
            ReasonKind::SecurityOverride => "SecurityOverride",
            ReasonKind::JudgeRejected => "JudgeRejected",
            ReasonKind::UpstreamRateLimit => "UpstreamRateLimit",
            ReasonKind::UpstreamError => "UpstreamError",
            ReasonKind::InternalError => "InternalError",
        }
    }
}

/// Outcome of `Pipeline::decide`.
pub enum Decision {
    Allow {
        rewritten: ChatRequest,
        metadata: ShieldMetadata,
    },
    Block {
        reason: ReasonKind,
        message: String,
        metadata: ShieldMetadata,
    },
}

// ---- Upstream completion response shape ----

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Usage,
}

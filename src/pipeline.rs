//! The request pipeline: the deterministic multi-stage decision machine.
//! Orchestrates the signature scanner, entropy analyzer, penalty store,
//! judge client, and sieve client into a single `Decision` per request.
//! Grounded on `main.rs`'s `process_connection`, which runs the same staged,
//! early-return dispatch (pre-filter -> LLM analysis -> decision) for the
//! kill-switch's simpler binary outcome.

use std::sync::Arc;

use crate::config::ShieldConfig;
use crate::entropy::{classify, shannon_entropy};
use crate::fingerprint::{fingerprint, CallerIdentity};
use crate::judge::JudgeClient;
use crate::model::{
    AttackProbability, ChatRequest, Decision, ReasonKind, ShieldMetadata, ThreatLevel,
};
use crate::penalty::PenaltyStore;
use crate::signature::{Family, SignatureScanner};
use crate::sieve::SieveClient;

pub struct Pipeline {
    config: Arc<ShieldConfig>,
    scanner: SignatureScanner,
    penalty: Arc<PenaltyStore>,
    sieve: SieveClient,
    judge: JudgeClient,
}

impl Pipeline {
    pub fn new(
        config: Arc<ShieldConfig>,
        scanner: SignatureScanner,
        penalty: Arc<PenaltyStore>,
        sieve: SieveClient,
        judge: JudgeClient,
    ) -> Self {
        Self {
            config,
            scanner,
            penalty,
            sieve,
            judge,
        }
    }

    pub fn penalty_store(&self) -> &Arc<PenaltyStore> {
        &self.penalty
    }

    /// Run the full staged decision. Short-circuits with `Decision::Block` at
    /// the first failing stage; every branch (Allow or Block) carries the
    /// metadata computed up to that point, with undocumented fields left at
    /// their documented defaults.
    pub async fn decide(&self, request: &ChatRequest, identity: &CallerIdentity, now: f64) -> Decision {
        let fp = fingerprint(identity);
        let mut metadata = ShieldMetadata::defaults();

        // Stage 1: extract target.
        let target_index = if self.config.pipeline_strict_last_message {
            request.target_index()
        } else {
            request.target_index_lenient()
        };
        let Some(target_index) = target_index else {
            return block(ReasonKind::BadRequest, "No messages found".to_string(), metadata);
        };
        let target = request.messages[target_index].content.clone();
        if target.trim().is_empty() {
            return block(ReasonKind::BadRequest, "Empty prompt".to_string(), metadata);
        }

        // Stage 2: signature scan.
        if let Some((family, fragment)) = self.scanner.scan(&target) {
            self.penalty.record_offense(&fp, 3.0, now);
            return match family {
                Family::RoleHijack => block(
                    ReasonKind::SecurityHijack,
                    format!("Security Block: Role Hijacking Detected (matched: \"{fragment}\")"),
                    metadata,
                ),
                Family::InstructionOverride => block(
                    ReasonKind::SecurityOverride,
                    format!("Security Block: Instruction Override Detected (matched: \"{fragment}\")"),
                    metadata,
                ),
            };
        }

        // Stage 3: entropy classification.
        let entropy = shannon_entropy(&target);
        let threat_level = classify(entropy, self.config.entropy_clean_max, self.config.entropy_weird_min);
        metadata.entropy_score = entropy;
        metadata.threat_level = threat_level;

        if threat_level == ThreatLevel::Weird {
            self.penalty.record_offense(&fp, 2.0, now);
            return block(
                ReasonKind::EntropyWeird,
                "WEIRD prompt detected (H > 6.5). Blocked to prevent DDoS.".to_string(),
                metadata,
            );
        }

        // Stage 4: compression level selection.
        let penalised = self.penalty.is_penalised(&fp, now);
        metadata.compression_level = if penalised {
            metadata.user_penalty_applied = true;
            self.config.compression_penalised_level.max(self.config.compression_base_level)
        } else if threat_level == ThreatLevel::Suspicious {
            self.config.compression_suspicious_level
        } else {
            self.config.compression_base_level
        };

        // Stage 5: judge (only for SUSPICIOUS).
        if threat_level == ThreatLevel::Suspicious && self.config.judge_enabled {
            let outcome = self.judge.evaluate(&target).await;
            metadata.evaluator_score = outcome.score;
            metadata.evaluator_validated = outcome.validated;
            if !outcome.valid {
                self.penalty.record_offense(&fp, 1.5, now);
                return block(
                    ReasonKind::JudgeRejected,
                    "Security Block: Judge Rejected Prompt As Malicious".to_string(),
                    metadata,
                );
            }
        }

        // Stage 6: compression.
        let original_tokens = estimate_tokens(&target);
        let sieve_outcome = self.sieve.compress(&target, metadata.compression_level).await;
        metadata.tokens_saved = sieve_outcome.tokens_saved;
        metadata.savings_pct = if original_tokens > 0 {
            100.0 * sieve_outcome.tokens_saved as f64 / original_tokens as f64
        } else {
            0.0
        };
        metadata.attack_probability = if metadata.savings_pct >= self.config.compression_attack_threshold_pct {
            AttackProbability::High
        } else {
            AttackProbability::Low
        };
        if metadata.attack_probability == AttackProbability::High {
            self.penalty.record_offense(&fp, 1.0, now);
        }

        // Stage 7: rewrite (system prompt and all other messages pinned).
        let rewritten = request.with_rewritten_target(target_index, sieve_outcome.text);

        // Stage 8: allow.
        Decision::Allow { rewritten, metadata }
    }

    pub fn record_token_cost(&self, identity: &CallerIdentity, tokens: u64, now: f64) {
        let fp = fingerprint(identity);
        self.penalty.record_token_cost(&fp, tokens, now);
    }
}

fn block(reason: ReasonKind, message: String, metadata: ShieldMetadata) -> Decision {
    Decision::Block {
        reason,
        message,
        metadata,
    }
}

/// Coarse token estimate for `savings_pct`, not a tokenizer: whitespace-split
/// word count. The sieve service owns the real accounting; this is only used
/// as the denominator when the sieve doesn't hand back an original-token count.
fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

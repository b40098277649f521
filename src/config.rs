//! Layered configuration: CLI flags → optional TOML file → env var overrides.
//!
//! Grounded on the reference kernel's `clap::Parser` `Args` struct in
//! `main.rs`, extended with a TOML overlay (the reference kernel already
//! depends on `toml` but never used it) and an env-var overlay for secrets,
//! the way `scoootscooob-aegis-protocol/aegis-rpc/src/config.rs` layers
//! `std::env::var(...).unwrap_or_else(...)` on top of defaults. The merged
//! result is one immutable `ShieldConfig` built once in `main()`, never a
//! lazily-memoized global accessor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// LLM Shield: protective reverse proxy for chat-completion APIs.
#[derive(Parser, Debug)]
#[command(name = "llm-shield")]
#[command(about = "Protective reverse proxy for LLM chat-completion APIs")]
pub struct Args {
    /// Optional TOML config file overlaying these defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Upstream chat-completion endpoint.
    #[arg(long, default_value = "http://localhost:1234/v1")]
    pub upstream_url: String,

    /// Sieve (compression) service endpoint.
    #[arg(long, default_value = "http://localhost:8081/compress")]
    pub sieve_url: String,

    /// Judge (LLM-as-judge) service endpoint.
    #[arg(long, default_value = "http://localhost:8082/v1/chat/completions")]
    pub judge_url: String,

    /// Disable the judge stage entirely.
    #[arg(long)]
    pub judge_disabled: bool,

    /// Audit log file path (append-only JSONL).
    #[arg(long, default_value = "llm-shield-audit.jsonl")]
    pub audit_log: PathBuf,
}

/// Optional TOML overlay. Every field is optional; absent fields keep the
/// CLI/default value. Mirrors the `[package]`-style flat tables the teacher
/// pack's `toml`-based configs use.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    upstream_url: Option<String>,
    sieve_url: Option<String>,
    judge_url: Option<String>,
    judge_enabled: Option<bool>,
    audit_log: Option<PathBuf>,

    entropy: Option<EntropyFile>,
    penalty: Option<PenaltyFile>,
    compression: Option<CompressionFile>,
    timeouts: Option<TimeoutsFile>,
    security: Option<SecurityFile>,
    pipeline: Option<PipelineFile>,
}

#[derive(Debug, Default, Deserialize)]
struct EntropyFile {
    clean_max: Option<f64>,
    weird_min: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PenaltyFile {
    threshold: Option<f64>,
    half_life_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CompressionFile {
    base_level: Option<f64>,
    suspicious_level: Option<f64>,
    penalised_level: Option<f64>,
    attack_threshold_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutsFile {
    sieve_s: Option<u64>,
    judge_s: Option<u64>,
    upstream_s: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityFile {
    patterns: Option<PatternsFile>,
}

#[derive(Debug, Default, Deserialize)]
struct PatternsFile {
    role_hijack: Option<Vec<String>>,
    instruction_override: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineFile {
    strict_last_message: Option<bool>,
}

/// Immutable, fully-resolved configuration handed by `Arc` into the pipeline
/// and every client. Constructed once at startup.
#[derive(Debug, Clone)]
pub struct ShieldConfig {
    pub host: String,
    pub port: u16,

    pub upstream_url: String,
    pub upstream_api_key: Option<String>,
    pub sieve_url: String,
    pub judge_url: String,
    pub judge_enabled: bool,

    pub audit_log: PathBuf,

    pub entropy_clean_max: f64,
    pub entropy_weird_min: f64,

    pub penalty_threshold: f64,
    pub penalty_half_life_seconds: f64,

    pub compression_base_level: f64,
    pub compression_suspicious_level: f64,
    pub compression_penalised_level: f64,
    pub compression_attack_threshold_pct: f64,

    pub timeout_sieve: std::time::Duration,
    pub timeout_judge: std::time::Duration,
    pub timeout_upstream: std::time::Duration,

    pub security_role_hijack_patterns: Vec<String>,
    pub security_instruction_override_patterns: Vec<String>,

    pub pipeline_strict_last_message: bool,
}

impl ShieldConfig {
    /// Default role-hijack signature family.
    pub(crate) fn default_role_hijack_patterns() -> Vec<String> {
        vec![
            r"(?i)you are now\b".to_string(),
            r"(?i)act as\b.*\b(no longer|instead of|rather than)\b".to_string(),
            r"(?i)pretend (to be|you are)\b".to_string(),
            r"(?i)from now on,? you are\b".to_string(),
            r"(?i)your new (identity|persona|role) is\b".to_string(),
        ]
    }

    /// Default instruction-override signature family.
    pub(crate) fn default_instruction_override_patterns() -> Vec<String> {
        vec![
            r"(?i)ignore (all |any )?previous instructions\b".to_string(),
            r"(?i)disregard (the |your )?system prompt\b".to_string(),
            r"(?i)forget (your |all )?guidelines\b".to_string(),
            r"(?i)ignore (everything|all) (above|before)\b".to_string(),
            r"(?i)override (your |the )?(system|safety) (prompt|instructions)\b".to_string(),
        ]
    }

    /// Build the merged config: CLI defaults → TOML file overlay → env overrides.
    pub fn load(args: &Args) -> Result<Self> {
        let file_cfg = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let entropy = file_cfg.entropy.unwrap_or_default();
        let penalty = file_cfg.penalty.unwrap_or_default();
        let compression = file_cfg.compression.unwrap_or_default();
        let timeouts = file_cfg.timeouts.unwrap_or_default();
        let security = file_cfg.security.unwrap_or_default();
        let patterns = security.patterns.unwrap_or_default();
        let pipeline = file_cfg.pipeline.unwrap_or_default();

        let host = env_override("SHIELD_HOST").unwrap_or_else(|| {
            file_cfg.host.clone().unwrap_or_else(|| args.host.clone())
        });
        let port = env_override("SHIELD_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| file_cfg.port.unwrap_or(args.port));

        let upstream_url = env_override("SHIELD_UPSTREAM_URL")
            .unwrap_or_else(|| file_cfg.upstream_url.clone().unwrap_or_else(|| args.upstream_url.clone()));
        let sieve_url = env_override("SHIELD_SIEVE_URL")
            .unwrap_or_else(|| file_cfg.sieve_url.clone().unwrap_or_else(|| args.sieve_url.clone()));
        let judge_url = env_override("SHIELD_JUDGE_URL")
            .unwrap_or_else(|| file_cfg.judge_url.clone().unwrap_or_else(|| args.judge_url.clone()));

        let judge_enabled = env_override("SHIELD_JUDGE_ENABLED")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| file_cfg.judge_enabled.unwrap_or(!args.judge_disabled));

        // Secrets live only in the environment, never in CLI flags or a checked-in TOML file.
        let upstream_api_key = env_override("SHIELD_UPSTREAM_API_KEY");

        let audit_log = file_cfg.audit_log.clone().unwrap_or_else(|| args.audit_log.clone());

        Ok(ShieldConfig {
            host,
            port,
            upstream_url,
            upstream_api_key,
            sieve_url,
            judge_url,
            judge_enabled,
            audit_log,
            entropy_clean_max: entropy.clean_max.unwrap_or(5.5),
            entropy_weird_min: entropy.weird_min.unwrap_or(6.5),
            penalty_threshold: penalty.threshold.unwrap_or(2.5),
            penalty_half_life_seconds: penalty.half_life_seconds.unwrap_or(600.0),
            compression_base_level: compression.base_level.unwrap_or(0.5),
            compression_suspicious_level: compression.suspicious_level.unwrap_or(0.7),
            compression_penalised_level: compression.penalised_level.unwrap_or(0.8),
            compression_attack_threshold_pct: compression.attack_threshold_pct.unwrap_or(80.0),
            timeout_sieve: std::time::Duration::from_secs(timeouts.sieve_s.unwrap_or(30)),
            timeout_judge: std::time::Duration::from_secs(timeouts.judge_s.unwrap_or(30)),
            timeout_upstream: std::time::Duration::from_secs(timeouts.upstream_s.unwrap_or(60)),
            security_role_hijack_patterns: patterns
                .role_hijack
                .unwrap_or_else(Self::default_role_hijack_patterns),
            security_instruction_override_patterns: patterns
                .instruction_override
                .unwrap_or_else(Self::default_instruction_override_patterns),
            pipeline_strict_last_message: pipeline.strict_last_message.unwrap_or(true),
        })
    }
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            config: None,
            host: "0.0.0.0".into(),
            port: 8080,
            upstream_url: "http://localhost:1234/v1".into(),
            sieve_url: "http://localhost:8081/compress".into(),
            judge_url: "http://localhost:8082/v1/chat/completions".into(),
            judge_disabled: false,
            audit_log: "llm-shield-audit.jsonl".into(),
        }
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = ShieldConfig::load(&base_args()).unwrap();
        assert_eq!(cfg.entropy_clean_max, 5.5);
        assert_eq!(cfg.entropy_weird_min, 6.5);
        assert_eq!(cfg.penalty_threshold, 2.5);
        assert_eq!(cfg.compression_base_level, 0.5);
        assert_eq!(cfg.compression_suspicious_level, 0.7);
        assert_eq!(cfg.compression_penalised_level, 0.8);
        assert!(cfg.judge_enabled);
        assert!(cfg.pipeline_strict_last_message);
    }

    #[test]
    fn toml_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shield.toml");
        std::fs::write(
            &path,
            r#"
            port = 9090

            [entropy]
            weird_min = 7.0

            [penalty]
            threshold = 3.0
            "#,
        )
        .unwrap();

        let mut args = base_args();
        args.config = Some(path);
        let cfg = ShieldConfig::load(&args).unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.entropy_weird_min, 7.0);
        assert_eq!(cfg.penalty_threshold, 3.0);
        // Unset fields keep CLI defaults.
        assert_eq!(cfg.entropy_clean_max, 5.5);
    }
}

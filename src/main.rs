//! LLM Shield - Protective Reverse Proxy for Chat-Completion APIs
//!
//! Inspects the final user message of every chat-completion request,
//! classifies it (signature scan, Shannon entropy, LLM-as-judge), optionally
//! compresses it, forwards the result to the upstream model, and attaches a
//! `llm_shield` metadata block to the response describing what happened.
//!
//! Wiring mirrors the reference kernel's `main.rs`: build every client once
//! (connection pooling), construct the audit trail once, then hand `Arc`
//! clones down into request handling rather than re-reading config per call.

mod audit;
mod config;
mod entropy;
mod error;
mod fingerprint;
mod http;
mod judge;
mod llm;
mod model;
mod penalty;
mod pipeline;
mod sieve;
mod signature;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use audit::AuditTrail;
use config::{Args, ShieldConfig};
use http::{build_router, ShieldState};
use judge::JudgeClient;
use llm::LlmClient;
use penalty::PenaltyStore;
use pipeline::Pipeline;
use sieve::SieveClient;
use signature::SignatureScanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("llm_shield=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(ShieldConfig::load(&args)?);

    // Create every downstream client ONCE (connection pooling), exactly as
    // the reference kernel builds its single `LlmClient` up front.
    let scanner = SignatureScanner::new(
        &config.security_role_hijack_patterns,
        &config.security_instruction_override_patterns,
    )?;
    let penalty = Arc::new(PenaltyStore::new(
        config.penalty_half_life_seconds,
        config.penalty_threshold,
    ));
    let sieve = SieveClient::new(&config.sieve_url, config.timeout_sieve);
    let judge = JudgeClient::new(&config.judge_url, config.timeout_judge);
    let pipeline = Pipeline::new(Arc::clone(&config), scanner, Arc::clone(&penalty), sieve, judge);

    let llm_client = LlmClient::new(
        &config.upstream_url,
        config.upstream_api_key.clone(),
        config.timeout_upstream,
    );

    let audit = AuditTrail::new(config.audit_log.clone())?;

    let state = Arc::new(ShieldState {
        config: Arc::clone(&config),
        pipeline,
        llm: llm_client,
        audit,
    });

    info!("═══════════════════════════════════════════════════════════════");
    info!("  LLM SHIELD: Protective Reverse Proxy");
    info!("═══════════════════════════════════════════════════════════════");
    info!("  Upstream:   {}", config.upstream_url);
    info!("  Sieve:      {}", config.sieve_url);
    info!("  Judge:      {} (enabled: {})", config.judge_url, config.judge_enabled);
    info!("  Audit log:  {}", config.audit_log.display());
    info!("  Listening:  {}:{}", config.host, config.port);
    info!("═══════════════════════════════════════════════════════════════");

    let router = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

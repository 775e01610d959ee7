//! # fraud_core
//!
//! Risk engine for scoring email signups in real time. Given an email plus
//! the originating network identity, it fans out independent signal probes
//! (disposable-domain registry, DNS MX, WHOIS age, IP intelligence, SMTP,
//! entropy, naming patterns, velocity counters), merges whatever survived
//! under a fail-open policy, and maps the result through a deterministic
//! additive scorer into a typed decision envelope.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fraud_core::{
//!     AnalysisInput, AnalysisMode, DisposableRegistry, EngineConfig, MemoryStore, RiskEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let registry = Arc::new(DisposableRegistry::from_list(
//!         fraud_core::disposable::SEED_LIST,
//!         0.0001,
//!     )?);
//!     let engine = RiskEngine::new(EngineConfig::default(), store, registry)?;
//!
//!     let input = AnalysisInput {
//!         email: "john.doe@gmail.com".into(),
//!         ip: Some("203.0.114.7".into()),
//!         user_agent: None,
//!         request_id: None,
//!     };
//!     let envelope = engine.analyse(&input, AnalysisMode::Full).await?;
//!     println!("score {}", envelope.risk_summary.score);
//!     Ok(())
//! }
//! ```

pub mod disposable;
pub mod engine;
pub mod enrichment;
pub mod entropy;
pub mod envelope;
pub mod net;
pub mod normalizer;
pub mod pattern;
pub mod probes;
pub mod scorer;
pub mod store;
pub mod velocity;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Wall-clock source, injectable so time-bucketed state is testable.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// One analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub email: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Engine-wide configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub weights: scorer::ScoreWeights,
    /// Overall wall-clock budget for one analysis.
    pub overall_budget: Duration,
    /// Domains where a `+` alias segment is stripped for canonicalization.
    pub alias_capable_domains: HashSet<String>,
    pub velocity: velocity::VelocityConfig,
    pub mx: probes::mx::MxConfig,
    pub whois: probes::whois::WhoisConfig,
    pub ip_intel: probes::ipintel::IpIntelConfig,
    pub smtp: probes::smtp::SmtpConfig,
    pub pattern: pattern::PatternConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: scorer::ScoreWeights::default(),
            overall_budget: Duration::from_secs(8),
            alias_capable_domains: [
                "gmail.com",
                "googlemail.com",
                "outlook.com",
                "hotmail.com",
                "live.com",
                "yahoo.com",
                "icloud.com",
                "proton.me",
                "protonmail.com",
                "fastmail.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            velocity: velocity::VelocityConfig::default(),
            mx: probes::mx::MxConfig::default(),
            whois: probes::whois::WhoisConfig::default(),
            ip_intel: probes::ipintel::IpIntelConfig::default(),
            smtp: probes::smtp::SmtpConfig::default(),
            pattern: pattern::PatternConfig::default(),
        }
    }
}

/// Hard errors surfaced to callers. Probe and store failures are absorbed by
/// the fail-open policy and never appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input is not a syntactically valid email address. Short-circuits
    /// analysis; the transport maps it to a 4xx response.
    #[error("invalid email syntax: {0}")]
    InvalidSyntax(String),
    /// Rejected configuration; raised only at startup.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

// Re-export the main surface.
pub use disposable::DisposableRegistry;
pub use engine::{AnalysisMode, RiskEngine};
pub use envelope::{
    EnrichmentInfo, EnrichmentStatus, Envelope, PatternKind, ReasonCode, ReasonContribution,
    RecommendedAction, RiskLevel, RiskSummary, Signals,
};
pub use store::{KvStore, MemoryStore, StoreError};

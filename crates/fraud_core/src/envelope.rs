//! Typed response envelope returned by the risk engine.
//!
//! Field names here are part of the wire contract; the HTTP layer serializes
//! these structs verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Coarse risk band derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Recommended handling for the signup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Allow,
    Challenge,
    Block,
}

/// First positive pattern sub-check, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    Sequential,
    NumberSuffix,
    SimilarToRecent,
}

/// Stable reason codes attached to point contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    DisposableDomain,
    NoMx,
    SmtpUndeliverable,
    NewDomain,
    VpnOrProxy,
    PatternSequential,
    VelocityBreach,
    PatternSimilarToRecent,
    HighEntropy,
    DatacenterIp,
    PatternNumberSuffix,
    SmtpCatchAll,
    /// Zero-point observability marker: the analysis deadline expired before
    /// the minimum cheap-signal set completed.
    Incomplete,
}

/// One explainability entry: why points were (or were not) added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonContribution {
    pub code: ReasonCode,
    pub points: u32,
    pub message: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ReasonContribution {
    pub fn new(code: ReasonCode, points: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            points,
            message: message.into(),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }
}

/// All signals the engine can produce for one analysis.
///
/// Every field is optional: `None` means the producing probe was skipped,
/// disabled, or failed after retries. A `Some(false)` boolean always means the
/// probe ran to completion and returned a negative verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub is_disposable: Option<bool>,
    pub mx_found: Option<bool>,
    pub entropy_score: Option<f64>,
    pub is_alias: Option<bool>,
    pub velocity_breach: Option<bool>,
    pub is_vpn: Option<bool>,
    pub is_proxy: Option<bool>,
    pub is_datacenter: Option<bool>,
    pub ip_country: Option<String>,
    pub domain_age_days: Option<i64>,
    pub is_new_domain: Option<bool>,
    pub pattern_detected: Option<PatternKind>,
    pub is_sequential: Option<bool>,
    pub has_number_suffix: Option<bool>,
    pub is_similar_to_recent: Option<bool>,
    pub smtp_valid: Option<bool>,
    pub smtp_deliverable: Option<bool>,
    pub catch_all_domain: Option<bool>,
}

impl Signals {
    /// Fill every `None` field from `other`, leaving populated fields alone.
    ///
    /// Used by the slow-probe fan-out and by enrichment merging: each probe
    /// returns a patch with only its own fields set.
    pub fn merge_missing(&mut self, other: &Signals) {
        macro_rules! take_missing {
            ($($field:ident),+ $(,)?) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )+
            };
        }
        take_missing!(
            is_disposable,
            mx_found,
            entropy_score,
            is_alias,
            velocity_breach,
            is_vpn,
            is_proxy,
            is_datacenter,
            ip_country,
            domain_age_days,
            is_new_domain,
            pattern_detected,
            is_sequential,
            has_number_suffix,
            is_similar_to_recent,
            smtp_valid,
            smtp_deliverable,
            catch_all_domain,
        );
    }
}

/// Score, band and recommended action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub score: u32,
    pub level: RiskLevel,
    pub action: RecommendedAction,
}

/// State of the background enrichment attached to an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnrichmentStatus {
    Disabled,
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentInfo {
    pub status: EnrichmentStatus,
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentInfo {
    pub fn disabled() -> Self {
        Self {
            status: EnrichmentStatus::Disabled,
            job_id: None,
            error: None,
        }
    }

    pub fn complete(job_id: Option<String>) -> Self {
        Self {
            status: EnrichmentStatus::Complete,
            job_id,
            error: None,
        }
    }

    pub fn pending(job_id: String) -> Self {
        Self {
            status: EnrichmentStatus::Pending,
            job_id: Some(job_id),
            error: None,
        }
    }

    pub fn failed(job_id: String, error: impl Into<String>) -> Self {
        Self {
            status: EnrichmentStatus::Failed,
            job_id: Some(job_id),
            error: Some(error.into()),
        }
    }
}

/// Full analysis result for one signup attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub email: String,
    pub normalized_email: String,
    pub reasons: Vec<ReasonContribution>,
    pub risk_summary: RiskSummary,
    pub signals: Signals,
    pub enrichment: EnrichmentInfo,
}

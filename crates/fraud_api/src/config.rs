//! Configuration for the fraud-risk API.
//!
//! Layered with figment: struct defaults, then an optional `Config.toml`,
//! then `FRAUD_API_`-prefixed environment variables (sections separated by
//! `__`, e.g. `FRAUD_API_SERVER__PORT=8080`).
//!
//! Validation runs once at startup and fails closed outside dev: a missing
//! admin key or nonsensical scoring weights prevent the process from
//! starting at all.

use fraud_core::probes::ipintel::ProviderKind;
use fraud_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub scoring: ScoringConfig,
    pub signals: SignalConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
    pub enrichment: EnrichmentConfig,
    pub webhooks: WebhookConfig,
    pub disposable: DisposableConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 30,
        }
    }
}

/// Backing store selection. Only the in-process memory backend ships today;
/// `endpoint` is reserved for networked backends behind the same trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: String,
    pub endpoint: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            endpoint: None,
        }
    }
}

/// Scoring weights and decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub score_disposable_domain: u32,
    pub score_no_mx: u32,
    pub score_smtp_undeliverable: u32,
    pub score_new_domain: u32,
    pub score_vpn_or_proxy: u32,
    pub score_pattern_sequential: u32,
    pub score_velocity_breach: u32,
    pub score_pattern_similar_to_recent: u32,
    pub score_high_entropy: u32,
    pub score_datacenter_ip: u32,
    pub score_pattern_number_suffix: u32,
    pub score_smtp_catch_all: u32,
    pub entropy_threshold: f64,
    pub risk_low_max: u32,
    pub risk_medium_max: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let w = fraud_core::scorer::ScoreWeights::default();
        Self {
            score_disposable_domain: w.disposable_domain,
            score_no_mx: w.no_mx,
            score_smtp_undeliverable: w.smtp_undeliverable,
            score_new_domain: w.new_domain,
            score_vpn_or_proxy: w.vpn_or_proxy,
            score_pattern_sequential: w.pattern_sequential,
            score_velocity_breach: w.velocity_breach,
            score_pattern_similar_to_recent: w.pattern_similar_to_recent,
            score_high_entropy: w.high_entropy,
            score_datacenter_ip: w.datacenter_ip,
            score_pattern_number_suffix: w.pattern_number_suffix,
            score_smtp_catch_all: w.smtp_catch_all,
            entropy_threshold: w.entropy_threshold,
            risk_low_max: w.risk_low_max,
            risk_medium_max: w.risk_medium_max,
        }
    }
}

/// Probe behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub overall_budget_secs: u64,
    pub velocity_ip_limit_per_hour: i64,
    pub velocity_domain_limit_per_hour: i64,
    /// Width of one velocity bucket; counters expire after two widths.
    pub velocity_bucket_secs: u64,
    pub new_domain_age_days: i64,
    /// Comma-separated provider chain: ipapi_co, ipwhois, ipapi_http.
    pub ip_intel_providers: String,
    pub ip_intel_verify_tls: bool,
    pub enable_smtp_verification: bool,
    pub smtp_sender: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            overall_budget_secs: 8,
            velocity_ip_limit_per_hour: 10,
            velocity_domain_limit_per_hour: 100,
            velocity_bucket_secs: 3600,
            new_domain_age_days: 30,
            ip_intel_providers: "ipapi_co,ipwhois,ipapi_http".to_string(),
            ip_intel_verify_tls: true,
            enable_smtp_verification: false,
            smtp_sender: "verify@example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Required in the `X-Admin-API-Key` header on admin routes. Empty is
    /// tolerated only in dev.
    pub admin_api_key: String,
    /// dev, staging or prod.
    pub environment: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_api_key: String::new(),
            environment: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub json_logs: bool,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub enable_background_enrichment: bool,
    pub result_ttl_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enable_background_enrichment: false,
            result_ttl_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Comma-separated target URLs; empty disables delivery.
    pub urls: String,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            urls: String::new(),
            verify_tls: true,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposableConfig {
    /// Optional path to a seed list replacing the packaged one.
    pub seed_path: Option<String>,
    /// Optional remote blocklist unioned in at startup.
    pub remote_url: Option<String>,
    pub bloom_fp_rate: f64,
}

impl Default for DisposableConfig {
    fn default() -> Self {
        Self {
            seed_path: None,
            remote_url: None,
            bloom_fp_rate: 0.0001,
        }
    }
}

impl AppConfig {
    pub fn is_dev(&self) -> bool {
        self.security.environment.trim().eq_ignore_ascii_case("dev")
    }

    /// Startup validation. Errors here must prevent the process from serving.
    pub fn validate(&self) -> Result<(), String> {
        if !self.is_dev() && self.security.admin_api_key.trim().is_empty() {
            return Err(format!(
                "admin_api_key must be set when environment is '{}'",
                self.security.environment
            ));
        }
        if self.store.backend != "memory" {
            return Err(format!("unsupported store backend '{}'", self.store.backend));
        }

        let s = &self.scoring;
        for (name, value) in [
            ("score_disposable_domain", s.score_disposable_domain),
            ("score_no_mx", s.score_no_mx),
            ("score_smtp_undeliverable", s.score_smtp_undeliverable),
            ("score_new_domain", s.score_new_domain),
            ("score_vpn_or_proxy", s.score_vpn_or_proxy),
            ("score_pattern_sequential", s.score_pattern_sequential),
            ("score_velocity_breach", s.score_velocity_breach),
            (
                "score_pattern_similar_to_recent",
                s.score_pattern_similar_to_recent,
            ),
            ("score_high_entropy", s.score_high_entropy),
            ("score_datacenter_ip", s.score_datacenter_ip),
            ("score_pattern_number_suffix", s.score_pattern_number_suffix),
            ("score_smtp_catch_all", s.score_smtp_catch_all),
        ] {
            if value > 100 {
                return Err(format!("{name} must be in 0..=100, got {value}"));
            }
        }
        if s.risk_low_max >= s.risk_medium_max {
            return Err(format!(
                "risk_low_max ({}) must be below risk_medium_max ({})",
                s.risk_low_max, s.risk_medium_max
            ));
        }
        if s.entropy_threshold <= 0.0 {
            return Err("entropy_threshold must be positive".to_string());
        }

        self.parse_providers().map(|_| ())
    }

    fn parse_providers(&self) -> Result<Vec<ProviderKind>, String> {
        let providers: Result<Vec<_>, _> = self
            .signals
            .ip_intel_providers
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect();
        let providers = providers?;
        if providers.is_empty() {
            return Err("at least one ip intelligence provider is required".to_string());
        }
        Ok(providers)
    }

    pub fn webhook_urls(&self) -> Vec<String> {
        self.webhooks
            .urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Translate into the core engine's configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        let mut config = EngineConfig::default();

        let s = &self.scoring;
        config.weights = fraud_core::scorer::ScoreWeights {
            disposable_domain: s.score_disposable_domain,
            no_mx: s.score_no_mx,
            smtp_undeliverable: s.score_smtp_undeliverable,
            new_domain: s.score_new_domain,
            vpn_or_proxy: s.score_vpn_or_proxy,
            pattern_sequential: s.score_pattern_sequential,
            velocity_breach: s.score_velocity_breach,
            pattern_similar_to_recent: s.score_pattern_similar_to_recent,
            high_entropy: s.score_high_entropy,
            datacenter_ip: s.score_datacenter_ip,
            pattern_number_suffix: s.score_pattern_number_suffix,
            smtp_catch_all: s.score_smtp_catch_all,
            entropy_threshold: s.entropy_threshold,
            risk_low_max: s.risk_low_max,
            risk_medium_max: s.risk_medium_max,
        };

        config.overall_budget = Duration::from_secs(self.signals.overall_budget_secs);
        config.velocity.ip_limit = self.signals.velocity_ip_limit_per_hour;
        config.velocity.domain_limit = self.signals.velocity_domain_limit_per_hour;
        config.velocity.bucket = Duration::from_secs(self.signals.velocity_bucket_secs.max(1));
        config.whois.new_domain_days = self.signals.new_domain_age_days;
        config.ip_intel.providers = self.parse_providers()?;
        config.ip_intel.verify_tls = self.signals.ip_intel_verify_tls;
        config.smtp.enabled = self.signals.enable_smtp_verification;
        config.smtp.sender = self.signals.smtp_sender.clone();

        Ok(config)
    }
}

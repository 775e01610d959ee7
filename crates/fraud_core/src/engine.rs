//! Risk engine: orchestrates the signal probes and the scorer.
//!
//! Probes are independent and never cancel each other; every probe future is
//! bounded by its own deadline and by the overall analysis budget. Whatever
//! is missing when the budget runs out simply stays null, and the scorer is
//! applied once to the surviving signal set.

use crate::disposable::DisposableRegistry;
use crate::entropy::shannon_entropy;
use crate::envelope::{Envelope, EnrichmentInfo, ReasonCode, ReasonContribution, Signals};
use crate::normalizer::{self, ParsedEmail};
use crate::pattern::PatternDetector;
use crate::probes::ipintel::IpIntelProber;
use crate::probes::mx::MxProber;
use crate::probes::smtp::SmtpProber;
use crate::probes::whois::WhoisProber;
use crate::probes::{Probe, ProbeInput};
use crate::scorer::{self, ScoreContext};
use crate::store::KvStore;
use crate::velocity::VelocityTracker;
use crate::{AnalysisInput, EngineConfig, Result, SystemClock};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::{AsyncResolver, TokioAsyncResolver};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How much of the pipeline to run synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Run every enabled probe within the overall budget.
    Full,
    /// Run only the cheap probes; slow signals stay null and are left to
    /// background enrichment.
    Fast,
}

pub struct RiskEngine {
    config: EngineConfig,
    registry: Arc<DisposableRegistry>,
    mx: MxProber,
    velocity: VelocityTracker,
    pattern: PatternDetector,
    slow_probes: Vec<Arc<dyn Probe>>,
}

impl RiskEngine {
    /// Build an engine over the given store and disposable registry.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn KvStore>,
        registry: Arc<DisposableRegistry>,
    ) -> Result<Self> {
        let resolver = Arc::new(build_resolver());

        let mx = MxProber::new(resolver.clone(), store.clone(), config.mx.clone());
        let velocity = VelocityTracker::new(
            store.clone(),
            Arc::new(SystemClock),
            config.velocity.clone(),
        );
        let pattern = PatternDetector::new(store.clone(), config.pattern.clone());

        let mut slow_probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(WhoisProber::new(store.clone(), config.whois.clone())),
            Arc::new(IpIntelProber::new(store.clone(), config.ip_intel.clone())?),
        ];
        if config.smtp.enabled {
            slow_probes.push(Arc::new(SmtpProber::new(
                resolver,
                store,
                config.smtp.clone(),
            )));
        }

        info!(
            disposable_domains = registry.domain_count(),
            slow_probes = slow_probes.len(),
            smtp_enabled = config.smtp.enabled,
            "risk engine initialized"
        );

        Ok(Self {
            config,
            registry,
            mx,
            velocity,
            pattern,
            slow_probes,
        })
    }

    /// Replace the slow-probe set. The engine only depends on the [`Probe`]
    /// shape, so embedders can add or stub probes.
    pub fn with_slow_probes(mut self, probes: Vec<Arc<dyn Probe>>) -> Self {
        self.slow_probes = probes;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyse one signup attempt.
    ///
    /// Returns `EngineError::InvalidSyntax` for unparseable input; every
    /// other failure degrades to null signals inside the envelope.
    pub async fn analyse(&self, input: &AnalysisInput, mode: AnalysisMode) -> Result<Envelope> {
        let parsed = normalizer::parse(&input.email, &self.config.alias_capable_domains)?;
        debug!(email = %parsed.normalized, ?mode, "analysing signup attempt");

        let deadline = Instant::now() + self.config.overall_budget;

        // Slow probes start first so they overlap the cheap set.
        let mut slow_set = JoinSet::new();
        if mode == AnalysisMode::Full {
            self.spawn_slow_probes(&mut slow_set, &parsed, input.ip.clone());
        }

        let mut signals = Signals {
            is_alias: Some(parsed.is_alias),
            is_disposable: Some(self.registry.is_disposable(&parsed.domain)),
            entropy_score: Some(round2(shannon_entropy(&parsed.local_part))),
            ..Signals::default()
        };

        let (mx_result, velocity_result, pattern_report) = tokio::join!(
            tokio::time::timeout_at(deadline, self.mx.has_mx(&parsed.domain)),
            self.velocity.record(input.ip.as_deref(), &parsed.domain),
            self.pattern.analyze(&parsed),
        );

        let mut budget_expired = false;
        match mx_result {
            Ok(found) => signals.mx_found = found,
            Err(_) => {
                budget_expired = true;
                warn!(domain = %parsed.domain, "analysis budget expired before mx lookup finished");
            }
        }
        signals.velocity_breach = velocity_result;
        signals.is_sequential = pattern_report.is_sequential;
        signals.has_number_suffix = Some(pattern_report.has_number_suffix);
        signals.is_similar_to_recent = pattern_report.is_similar_to_recent;
        signals.pattern_detected = pattern_report.pattern;

        self.drain_slow_probes(&mut slow_set, deadline, &mut signals)
            .await;

        let envelope = self.build_envelope(input, &parsed, signals, budget_expired, mode);

        // The recent window only learns from scored attempts, so rejected
        // input never pollutes similarity.
        self.pattern.record(&parsed).await;

        info!(
            email = %envelope.normalized_email,
            score = envelope.risk_summary.score,
            level = ?envelope.risk_summary.level,
            action = ?envelope.risk_summary.action,
            "analysis decision"
        );
        Ok(envelope)
    }

    /// Re-run the slow probes for a queued job and merge them into the
    /// fast-path envelope, re-scoring the combined signal set.
    pub async fn enrich(&self, input: &AnalysisInput, partial: &Envelope) -> Result<Envelope> {
        let parsed = normalizer::parse(&input.email, &self.config.alias_capable_domains)?;
        let deadline = Instant::now() + self.config.overall_budget;

        let mut slow_set = JoinSet::new();
        self.spawn_slow_probes(&mut slow_set, &parsed, input.ip.clone());

        let mut signals = partial.signals.clone();
        self.drain_slow_probes(&mut slow_set, deadline, &mut signals)
            .await;

        Ok(self.build_envelope(input, &parsed, signals, false, AnalysisMode::Full))
    }

    fn spawn_slow_probes(
        &self,
        slow_set: &mut JoinSet<(&'static str, Option<Signals>)>,
        parsed: &ParsedEmail,
        ip: Option<String>,
    ) {
        let probe_input = ProbeInput {
            email: parsed.clone(),
            ip,
        };
        for probe in &self.slow_probes {
            let probe = Arc::clone(probe);
            let probe_input = probe_input.clone();
            slow_set.spawn(async move {
                let name = probe.name();
                match tokio::time::timeout(probe.timeout(), probe.run(&probe_input)).await {
                    Ok(patch) => (name, patch),
                    Err(_) => {
                        warn!(probe = name, kind = "deadline", "probe missed its deadline");
                        (name, None)
                    }
                }
            });
        }
    }

    /// Collect slow-probe patches until the set drains or the overall budget
    /// expires. Dropping the set aborts whatever is still in flight.
    async fn drain_slow_probes(
        &self,
        slow_set: &mut JoinSet<(&'static str, Option<Signals>)>,
        deadline: Instant,
        signals: &mut Signals,
    ) {
        loop {
            match tokio::time::timeout_at(deadline, slow_set.join_next()).await {
                Ok(Some(Ok((name, Some(patch))))) => {
                    debug!(probe = name, "slow probe completed");
                    signals.merge_missing(&patch);
                }
                Ok(Some(Ok((name, None)))) => {
                    debug!(probe = name, "slow probe produced no signals");
                }
                Ok(Some(Err(e))) => {
                    warn!(kind = "join", error = %e, "slow probe task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("overall budget exhausted, aborting remaining slow probes");
                    slow_set.abort_all();
                    break;
                }
            }
        }
    }

    fn build_envelope(
        &self,
        input: &AnalysisInput,
        parsed: &ParsedEmail,
        signals: Signals,
        budget_expired: bool,
        mode: AnalysisMode,
    ) -> Envelope {
        let ctx = ScoreContext {
            domain: &parsed.domain,
            ip: input.ip.as_deref(),
            new_domain_threshold_days: self.config.whois.new_domain_days,
            velocity_ip_limit: self.config.velocity.ip_limit,
        };
        let verdict = scorer::score(&signals, &ctx, &self.config.weights);

        let mut reasons = verdict.reasons;
        if budget_expired {
            reasons.push(ReasonContribution::new(
                ReasonCode::Incomplete,
                0,
                "Analysis budget expired before all core signals completed",
            ));
        }

        Envelope {
            email: parsed.raw.clone(),
            normalized_email: parsed.normalized.clone(),
            reasons,
            risk_summary: verdict.summary,
            signals,
            enrichment: match mode {
                AnalysisMode::Full => EnrichmentInfo::complete(None),
                AnalysisMode::Fast => EnrichmentInfo::disabled(),
            },
        }
    }
}

fn build_resolver() -> TokioAsyncResolver {
    match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            warn!(error = %e, "system resolver config unavailable, using defaults");
            AsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnrichmentStatus, RecommendedAction, RiskLevel};
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use crate::EngineError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn registry() -> Arc<DisposableRegistry> {
        Arc::new(DisposableRegistry::from_list(crate::disposable::SEED_LIST, 0.0001).unwrap())
    }

    async fn engine_with_store(store: Arc<MemoryStore>) -> RiskEngine {
        // Slow probes are replaced per test; the default set would hit the
        // network.
        RiskEngine::new(EngineConfig::default(), store, registry())
            .unwrap()
            .with_slow_probes(Vec::new())
    }

    fn input(email: &str, ip: Option<&str>) -> AnalysisInput {
        AnalysisInput {
            email: email.to_string(),
            ip: ip.map(|s| s.to_string()),
            user_agent: Some("test-agent".to_string()),
            request_id: None,
        }
    }

    async fn seed_mx(store: &MemoryStore, domain: &str, found: bool) {
        store
            .set(&format!("mx:{domain}"), if found { "1" } else { "0" }, None)
            .await
            .unwrap();
    }

    /// Fixed-patch slow probe for fan-out tests.
    struct StubProbe(Signals);

    #[async_trait]
    impl Probe for StubProbe {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn run(&self, _input: &ProbeInput) -> Option<Signals> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn clean_signup_scores_zero() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "gmail.com", true).await;
        let engine = engine_with_store(store).await;

        let envelope = engine
            .analyse(&input("john.doe@gmail.com", None), AnalysisMode::Full)
            .await
            .unwrap();

        assert_eq!(envelope.risk_summary.score, 0);
        assert_eq!(envelope.risk_summary.level, RiskLevel::Low);
        assert_eq!(envelope.risk_summary.action, RecommendedAction::Allow);
        assert!(envelope.reasons.is_empty());
        assert_eq!(envelope.signals.is_disposable, Some(false));
        assert_eq!(envelope.signals.mx_found, Some(true));
        assert_eq!(envelope.enrichment.status, EnrichmentStatus::Complete);
    }

    #[tokio::test]
    async fn disposable_domain_blocks_with_single_reason() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "mailinator.com", true).await;
        let engine = engine_with_store(store).await;

        let envelope = engine
            .analyse(&input("anything@mailinator.com", None), AnalysisMode::Full)
            .await
            .unwrap();

        assert_eq!(envelope.risk_summary.score, 90);
        assert_eq!(envelope.risk_summary.level, RiskLevel::High);
        assert_eq!(envelope.risk_summary.action, RecommendedAction::Block);
        let codes: Vec<_> = envelope.reasons.iter().map(|r| r.code).collect();
        assert_eq!(codes, vec![ReasonCode::DisposableDomain]);
    }

    #[tokio::test]
    async fn invalid_syntax_is_a_hard_reject() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with_store(store.clone()).await;

        let err = engine
            .analyse(&input("not-an-email", None), AnalysisMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSyntax(_)));

        // Rejected input never reaches the recent window.
        assert_eq!(store.scan_keys("recent:").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn alias_is_stripped_and_reported() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "gmail.com", true).await;
        let engine = engine_with_store(store).await;

        let envelope = engine
            .analyse(&input("user+tag@gmail.com", None), AnalysisMode::Full)
            .await
            .unwrap();

        assert_eq!(envelope.normalized_email, "user@gmail.com");
        assert_eq!(envelope.signals.is_alias, Some(true));
        assert_eq!(envelope.risk_summary.score, 0);
    }

    #[tokio::test]
    async fn sequential_burst_from_one_ip_maxes_out() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "example.com", true).await;
        let engine = engine_with_store(store).await;

        let mut last = None;
        for i in 1..=15 {
            last = Some(
                engine
                    .analyse(
                        &input(&format!("user{i}@example.com"), Some("198.51.101.7")),
                        AnalysisMode::Full,
                    )
                    .await
                    .unwrap(),
            );
        }
        let envelope = last.unwrap();

        assert_eq!(envelope.risk_summary.score, 100);
        assert_eq!(envelope.risk_summary.level, RiskLevel::High);
        let codes: Vec<_> = envelope.reasons.iter().map(|r| r.code).collect();
        assert!(codes.contains(&ReasonCode::PatternSequential));
        assert!(codes.contains(&ReasonCode::VelocityBreach));
        assert!(codes.contains(&ReasonCode::PatternSimilarToRecent));
    }

    #[tokio::test]
    async fn fast_mode_leaves_slow_signals_null() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "gmail.com", true).await;
        let engine = RiskEngine::new(EngineConfig::default(), store, registry())
            .unwrap()
            .with_slow_probes(vec![Arc::new(StubProbe(Signals {
                is_new_domain: Some(true),
                domain_age_days: Some(3),
                ..Signals::default()
            }))]);

        let envelope = engine
            .analyse(&input("a@gmail.com", None), AnalysisMode::Fast)
            .await
            .unwrap();

        assert_eq!(envelope.signals.is_new_domain, None);
        assert_eq!(envelope.signals.domain_age_days, None);
        assert_eq!(envelope.signals.is_vpn, None);
        assert_eq!(envelope.enrichment.status, EnrichmentStatus::Disabled);
        // Cheap set still ran.
        assert_eq!(envelope.signals.mx_found, Some(true));
        assert!(envelope.signals.entropy_score.is_some());
    }

    #[tokio::test]
    async fn full_mode_merges_slow_probe_patches() {
        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "newdomain.tld", true).await;
        let engine = RiskEngine::new(EngineConfig::default(), store, registry())
            .unwrap()
            .with_slow_probes(vec![
                Arc::new(StubProbe(Signals {
                    is_new_domain: Some(true),
                    domain_age_days: Some(5),
                    ..Signals::default()
                })),
                Arc::new(StubProbe(Signals {
                    is_vpn: Some(true),
                    is_proxy: Some(false),
                    is_datacenter: Some(false),
                    ip_country: Some("Panama".to_string()),
                    ..Signals::default()
                })),
            ]);

        // Random-looking local part on a 5-day-old domain behind a VPN:
        // 60 + 50 already caps the score at 100.
        let envelope = engine
            .analyse(
                &input("a8f3k2@newdomain.tld", Some("203.0.114.8")),
                AnalysisMode::Full,
            )
            .await
            .unwrap();

        assert_eq!(envelope.risk_summary.score, 100);
        assert_eq!(envelope.risk_summary.level, RiskLevel::High);
        let codes: Vec<_> = envelope.reasons.iter().map(|r| r.code).collect();
        assert_eq!(codes, vec![ReasonCode::NewDomain, ReasonCode::VpnOrProxy]);
        assert_eq!(envelope.signals.ip_country.as_deref(), Some("Panama"));
        assert_eq!(envelope.signals.is_new_domain, Some(true));
    }

    #[tokio::test]
    async fn fast_plus_enrichment_matches_full() {
        let slow_patch = Signals {
            is_new_domain: Some(false),
            domain_age_days: Some(900),
            is_vpn: Some(false),
            is_proxy: Some(false),
            is_datacenter: Some(true),
            ip_country: Some("Germany".to_string()),
            ..Signals::default()
        };

        let store_full = Arc::new(MemoryStore::new());
        seed_mx(&store_full, "corp.example", true).await;
        let full_engine = RiskEngine::new(EngineConfig::default(), store_full, registry())
            .unwrap()
            .with_slow_probes(vec![Arc::new(StubProbe(slow_patch.clone()))]);

        let store_fast = Arc::new(MemoryStore::new());
        seed_mx(&store_fast, "corp.example", true).await;
        let fast_engine = RiskEngine::new(EngineConfig::default(), store_fast, registry())
            .unwrap()
            .with_slow_probes(vec![Arc::new(StubProbe(slow_patch))]);

        let request = input("testuser123@corp.example", Some("203.0.114.9"));

        let full = full_engine
            .analyse(&request, AnalysisMode::Full)
            .await
            .unwrap();
        let fast = fast_engine
            .analyse(&request, AnalysisMode::Fast)
            .await
            .unwrap();
        let enriched = fast_engine.enrich(&request, &fast).await.unwrap();

        assert_eq!(enriched.risk_summary, full.risk_summary);
        assert_eq!(enriched.reasons, full.reasons);
        assert_eq!(enriched.signals, full.signals);
    }

    /// Store that fails every operation, for degradation tests.
    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn incr_expire(&self, _: &str, _: Duration) -> StoreResult<i64> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_push_trim(
            &self,
            _: &str,
            _: &str,
            _: usize,
            _: Option<Duration>,
        ) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_range(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn list_len(&self, _: &str) -> StoreResult<usize> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn queue_push(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn queue_pop(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn acquire_lock(&self, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn release_lock(&self, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn scan_keys(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ttl(&self, _: &str) -> StoreResult<Option<Duration>> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_degrades_instead_of_failing() {
        let engine = RiskEngine::new(
            EngineConfig {
                // Keep the degraded MX lookup from stretching the test.
                mx: crate::probes::mx::MxConfig {
                    timeout: Duration::from_millis(200),
                    ..crate::probes::mx::MxConfig::default()
                },
                ..EngineConfig::default()
            },
            Arc::new(DownStore),
            registry(),
        )
        .unwrap()
        .with_slow_probes(Vec::new());

        let envelope = engine
            .analyse(
                &input("someone@mailinator.com", Some("203.0.114.10")),
                AnalysisMode::Full,
            )
            .await
            .unwrap();

        // Store-backed signals degrade to null; in-memory signals survive and
        // the surviving set is still scored.
        assert_eq!(envelope.signals.velocity_breach, None);
        assert_eq!(envelope.signals.is_sequential, None);
        assert_eq!(envelope.signals.is_similar_to_recent, None);
        assert_eq!(envelope.signals.is_disposable, Some(true));
        assert!(envelope.risk_summary.score >= 90);
    }

    #[tokio::test]
    async fn partial_failure_preserves_surviving_scores() {
        // One stub fails, one succeeds: the envelope must equal scoring only
        // the surviving signals.
        struct FailingProbe;

        #[async_trait]
        impl Probe for FailingProbe {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn timeout(&self) -> Duration {
                Duration::from_secs(1)
            }
            async fn run(&self, _input: &ProbeInput) -> Option<Signals> {
                None
            }
        }

        let store = Arc::new(MemoryStore::new());
        seed_mx(&store, "example.com", true).await;
        let engine = RiskEngine::new(EngineConfig::default(), store, registry())
            .unwrap()
            .with_slow_probes(vec![
                Arc::new(FailingProbe),
                Arc::new(StubProbe(Signals {
                    is_new_domain: Some(true),
                    domain_age_days: Some(2),
                    ..Signals::default()
                })),
            ]);

        let envelope = engine
            .analyse(&input("someone@example.com", None), AnalysisMode::Full)
            .await
            .unwrap();

        assert_eq!(envelope.risk_summary.score, 60);
        let codes: Vec<_> = envelope.reasons.iter().map(|r| r.code).collect();
        assert_eq!(codes, vec![ReasonCode::NewDomain]);
        // The failed probe's signals stay null.
        assert_eq!(envelope.signals.is_vpn, None);
    }
}

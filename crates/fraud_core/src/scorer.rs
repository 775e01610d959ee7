//! Additive risk scoring and decision mapping.
//!
//! A pure function over the signal record: deterministic score, level,
//! action, and an explainability list in a fixed order so equal inputs
//! produce byte-identical envelopes. Missing (null) signals contribute
//! nothing.

use crate::envelope::{
    ReasonCode, ReasonContribution, RecommendedAction, RiskLevel, RiskSummary, Signals,
};
use serde_json::json;

/// Per-signal weights and decision thresholds, read once at engine
/// construction.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub disposable_domain: u32,
    pub no_mx: u32,
    pub smtp_undeliverable: u32,
    pub new_domain: u32,
    pub vpn_or_proxy: u32,
    pub pattern_sequential: u32,
    pub velocity_breach: u32,
    pub pattern_similar_to_recent: u32,
    pub high_entropy: u32,
    pub datacenter_ip: u32,
    pub pattern_number_suffix: u32,
    pub smtp_catch_all: u32,
    /// Entropy above this value counts as machine-generated.
    pub entropy_threshold: f64,
    /// Highest score still mapped to LOW/ALLOW.
    pub risk_low_max: u32,
    /// Highest score still mapped to MEDIUM/CHALLENGE.
    pub risk_medium_max: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            disposable_domain: 90,
            no_mx: 100,
            smtp_undeliverable: 70,
            new_domain: 60,
            vpn_or_proxy: 50,
            pattern_sequential: 40,
            velocity_breach: 40,
            pattern_similar_to_recent: 35,
            high_entropy: 30,
            datacenter_ip: 30,
            pattern_number_suffix: 25,
            smtp_catch_all: 20,
            entropy_threshold: 4.5,
            risk_low_max: 30,
            risk_medium_max: 70,
        }
    }
}

/// Request-scoped context used only for reason messages and meta.
#[derive(Debug, Clone, Default)]
pub struct ScoreContext<'a> {
    pub domain: &'a str,
    pub ip: Option<&'a str>,
    pub new_domain_threshold_days: i64,
    pub velocity_ip_limit: i64,
}

/// Score + decision + ordered reasons for one signal record.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub summary: RiskSummary,
    pub reasons: Vec<ReasonContribution>,
}

/// Apply the additive scoring table to `signals`.
pub fn score(signals: &Signals, ctx: &ScoreContext<'_>, weights: &ScoreWeights) -> Verdict {
    let mut total: u32 = 0;
    let mut reasons = Vec::new();
    let mut add = |reason: ReasonContribution| {
        total = total.saturating_add(reason.points);
        reasons.push(reason);
    };

    if signals.is_disposable == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::DisposableDomain,
            weights.disposable_domain,
            format!(
                "Domain {} is a known disposable email provider",
                ctx.domain
            ),
        )
        .with_meta("domain", json!(ctx.domain)));
    }

    if signals.mx_found == Some(false) {
        add(ReasonContribution::new(
            ReasonCode::NoMx,
            weights.no_mx,
            format!("Domain {} has no MX records", ctx.domain),
        )
        .with_meta("domain", json!(ctx.domain)));
    }

    if signals.smtp_deliverable == Some(false) {
        add(ReasonContribution::new(
            ReasonCode::SmtpUndeliverable,
            weights.smtp_undeliverable,
            "SMTP verification indicates the mailbox does not exist",
        ));
    }

    if signals.is_new_domain == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::NewDomain,
            weights.new_domain,
            "Email domain is newly registered",
        )
        .with_meta("domain", json!(ctx.domain))
        .with_meta("age_days", json!(signals.domain_age_days))
        .with_meta("threshold_days", json!(ctx.new_domain_threshold_days)));
    }

    let vpn_or_proxy = signals.is_vpn == Some(true) || signals.is_proxy == Some(true);
    if vpn_or_proxy {
        add(ReasonContribution::new(
            ReasonCode::VpnOrProxy,
            weights.vpn_or_proxy,
            "Signup originated from a VPN/proxy",
        )
        .with_meta("ip_address", json!(ctx.ip))
        .with_meta("country", json!(signals.ip_country)));
    }

    if signals.is_sequential == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::PatternSequential,
            weights.pattern_sequential,
            "Email local-part looks sequential (bot-like)",
        ));
    }

    if signals.velocity_breach == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::VelocityBreach,
            weights.velocity_breach,
            "High signup velocity detected from this IP",
        )
        .with_meta("ip_address", json!(ctx.ip))
        .with_meta("limit_per_hour", json!(ctx.velocity_ip_limit)));
    }

    if signals.is_similar_to_recent == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::PatternSimilarToRecent,
            weights.pattern_similar_to_recent,
            "Email is very similar to a recently submitted email",
        ));
    }

    if let Some(entropy) = signals.entropy_score {
        if entropy > weights.entropy_threshold {
            add(ReasonContribution::new(
                ReasonCode::HighEntropy,
                weights.high_entropy,
                "Email local-part looks randomly generated (high entropy)",
            )
            .with_meta("entropy", json!(entropy))
            .with_meta("threshold", json!(weights.entropy_threshold)));
        }
    }

    // Datacenter origin only matters when the stronger VPN/proxy reason has
    // not already fired.
    if signals.is_datacenter == Some(true) && !vpn_or_proxy {
        add(ReasonContribution::new(
            ReasonCode::DatacenterIp,
            weights.datacenter_ip,
            "Signup originated from a datacenter/cloud IP",
        )
        .with_meta("ip_address", json!(ctx.ip))
        .with_meta("country", json!(signals.ip_country)));
    }

    if signals.has_number_suffix == Some(true) && signals.is_sequential != Some(true) {
        add(ReasonContribution::new(
            ReasonCode::PatternNumberSuffix,
            weights.pattern_number_suffix,
            "Email local-part ends with a multi-digit number suffix",
        ));
    }

    if signals.catch_all_domain == Some(true) {
        add(ReasonContribution::new(
            ReasonCode::SmtpCatchAll,
            weights.smtp_catch_all,
            "Domain appears to be catch-all (accepts any mailbox)",
        ));
    }

    let score = total.min(100);
    let (level, action) = if score <= weights.risk_low_max {
        (RiskLevel::Low, RecommendedAction::Allow)
    } else if score <= weights.risk_medium_max {
        (RiskLevel::Medium, RecommendedAction::Challenge)
    } else {
        (RiskLevel::High, RecommendedAction::Block)
    };

    Verdict {
        summary: RiskSummary {
            score,
            level,
            action,
        },
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> ScoreContext<'static> {
        ScoreContext {
            domain: "example.com",
            ip: Some("9.9.9.9"),
            new_domain_threshold_days: 30,
            velocity_ip_limit: 10,
        }
    }

    #[test]
    fn benign_signals_score_zero() {
        let signals = Signals {
            is_disposable: Some(false),
            mx_found: Some(true),
            entropy_score: Some(2.1),
            is_alias: Some(false),
            velocity_breach: Some(false),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        assert_eq!(verdict.summary.score, 0);
        assert_eq!(verdict.summary.level, RiskLevel::Low);
        assert_eq!(verdict.summary.action, RecommendedAction::Allow);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn disposable_alone_blocks() {
        let signals = Signals {
            is_disposable: Some(true),
            mx_found: Some(true),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        assert_eq!(verdict.summary.score, 90);
        assert_eq!(verdict.summary.level, RiskLevel::High);
        assert_eq!(verdict.summary.action, RecommendedAction::Block);
        assert_eq!(verdict.reasons.len(), 1);
        assert_eq!(verdict.reasons[0].code, ReasonCode::DisposableDomain);
    }

    #[test]
    fn new_domain_vpn_and_entropy_cap_at_100() {
        // 60 + 50 + 30 = 140, capped.
        let signals = Signals {
            is_disposable: Some(false),
            mx_found: Some(true),
            entropy_score: Some(4.9),
            is_new_domain: Some(true),
            domain_age_days: Some(5),
            is_vpn: Some(true),
            is_proxy: Some(false),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        assert_eq!(verdict.summary.score, 100);
        assert_eq!(verdict.summary.level, RiskLevel::High);
    }

    #[test]
    fn number_suffix_and_datacenter_is_medium() {
        // 25 + 30 = 55.
        let signals = Signals {
            mx_found: Some(true),
            has_number_suffix: Some(true),
            is_sequential: Some(false),
            is_datacenter: Some(true),
            is_vpn: Some(false),
            is_proxy: Some(false),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        assert_eq!(verdict.summary.score, 55);
        assert_eq!(verdict.summary.level, RiskLevel::Medium);
        assert_eq!(verdict.summary.action, RecommendedAction::Challenge);
    }

    #[test]
    fn datacenter_suppressed_when_vpn_fires() {
        let signals = Signals {
            is_vpn: Some(true),
            is_datacenter: Some(true),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        let codes: Vec<_> = verdict.reasons.iter().map(|r| r.code).collect();
        assert!(codes.contains(&ReasonCode::VpnOrProxy));
        assert!(!codes.contains(&ReasonCode::DatacenterIp));
    }

    #[test]
    fn number_suffix_suppressed_when_sequential_fires() {
        let signals = Signals {
            is_sequential: Some(true),
            has_number_suffix: Some(true),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        let codes: Vec<_> = verdict.reasons.iter().map(|r| r.code).collect();
        assert!(codes.contains(&ReasonCode::PatternSequential));
        assert!(!codes.contains(&ReasonCode::PatternNumberSuffix));
    }

    #[test]
    fn reasons_follow_fixed_order() {
        // Fire everything that can co-fire and check the order is the
        // documented sequence regardless of struct field order.
        let signals = Signals {
            is_disposable: Some(true),
            mx_found: Some(false),
            smtp_deliverable: Some(false),
            is_new_domain: Some(true),
            is_vpn: Some(true),
            is_sequential: Some(true),
            velocity_breach: Some(true),
            is_similar_to_recent: Some(true),
            entropy_score: Some(5.5),
            catch_all_domain: Some(true),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &ScoreWeights::default());
        let codes: Vec<_> = verdict.reasons.iter().map(|r| r.code).collect();
        assert_eq!(
            codes,
            vec![
                ReasonCode::DisposableDomain,
                ReasonCode::NoMx,
                ReasonCode::SmtpUndeliverable,
                ReasonCode::NewDomain,
                ReasonCode::VpnOrProxy,
                ReasonCode::PatternSequential,
                ReasonCode::VelocityBreach,
                ReasonCode::PatternSimilarToRecent,
                ReasonCode::HighEntropy,
                ReasonCode::SmtpCatchAll,
            ]
        );
    }

    #[test]
    fn null_signals_contribute_nothing() {
        let verdict = score(&Signals::default(), &ctx(), &ScoreWeights::default());
        assert_eq!(verdict.summary.score, 0);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn adding_a_positive_signal_never_lowers_the_score() {
        let base = Signals {
            is_disposable: Some(true),
            ..Signals::default()
        };
        let with_more = Signals {
            is_disposable: Some(true),
            velocity_breach: Some(true),
            ..Signals::default()
        };
        let weights = ScoreWeights::default();
        let a = score(&base, &ctx(), &weights).summary.score;
        let b = score(&with_more, &ctx(), &weights).summary.score;
        assert!(b >= a);
        assert!(b <= 100);
    }

    #[test]
    fn hundred_is_a_fixed_point() {
        let mut signals = Signals {
            is_disposable: Some(true),
            mx_found: Some(false),
            ..Signals::default()
        };
        let weights = ScoreWeights::default();
        assert_eq!(score(&signals, &ctx(), &weights).summary.score, 100);
        signals.velocity_breach = Some(true);
        signals.is_new_domain = Some(true);
        assert_eq!(score(&signals, &ctx(), &weights).summary.score, 100);
    }

    #[test]
    fn determinism_same_signals_same_verdict() {
        let signals = Signals {
            is_disposable: Some(true),
            velocity_breach: Some(true),
            entropy_score: Some(4.9),
            ..Signals::default()
        };
        let weights = ScoreWeights::default();
        let a = score(&signals, &ctx(), &weights);
        let b = score(&signals, &ctx(), &weights);
        assert_eq!(a, b);
    }

    #[test]
    fn boundary_scores_map_to_expected_levels() {
        let weights = ScoreWeights {
            smtp_catch_all: 30,
            ..ScoreWeights::default()
        };
        // Exactly 30 stays LOW.
        let signals = Signals {
            catch_all_domain: Some(true),
            ..Signals::default()
        };
        let verdict = score(&signals, &ctx(), &weights);
        assert_eq!(verdict.summary.score, 30);
        assert_eq!(verdict.summary.level, RiskLevel::Low);

        // 70 stays MEDIUM, 71 becomes HIGH.
        let weights = ScoreWeights {
            new_domain: 70,
            ..ScoreWeights::default()
        };
        let signals = Signals {
            is_new_domain: Some(true),
            ..Signals::default()
        };
        assert_eq!(
            score(&signals, &ctx(), &weights).summary.level,
            RiskLevel::Medium
        );
        let weights = ScoreWeights {
            new_domain: 71,
            ..ScoreWeights::default()
        };
        assert_eq!(
            score(&signals, &ctx(), &weights).summary.level,
            RiskLevel::High
        );
    }
}

//! Rolling per-IP and per-domain signup counters.
//!
//! Keys are hour-bucketed (`vel:{scope}:{value}:{floor(now/3600)}`) and
//! expire after two bucket widths, so a bucket never needs explicit cleanup.

use crate::net::parse_routable;
use crate::store::KvStore;
use crate::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct VelocityConfig {
    /// Per-IP signups per bucket before a breach.
    pub ip_limit: i64,
    /// Per-domain signups per bucket before a breach.
    pub domain_limit: i64,
    /// Counter bucket width.
    pub bucket: Duration,
    /// Major providers whose domain-scope counters are skipped entirely.
    pub provider_allowlist: HashSet<String>,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            ip_limit: 10,
            domain_limit: 100,
            bucket: Duration::from_secs(3600),
            provider_allowlist: [
                "gmail.com",
                "googlemail.com",
                "yahoo.com",
                "outlook.com",
                "hotmail.com",
                "live.com",
                "icloud.com",
                "aol.com",
                "protonmail.com",
                "proton.me",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

/// Tracks signup velocity per IP and per domain.
pub struct VelocityTracker {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: VelocityConfig,
}

impl VelocityTracker {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: VelocityConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Current hour bucket index.
    pub fn current_bucket(&self) -> u64 {
        self.clock.now_unix() / self.config.bucket.as_secs().max(1)
    }

    /// Atomically count this attempt against both scopes and report whether
    /// either limit was exceeded.
    ///
    /// Returns `None` when the store is unavailable (the counter could not be
    /// read, so no verdict is possible). Private, loopback and otherwise
    /// non-routable IPs are not counted.
    pub async fn record(&self, ip: Option<&str>, domain: &str) -> Option<bool> {
        let bucket = self.current_bucket();
        let ttl = self.config.bucket * 2;
        let mut breach = false;

        if let Some(ip) = ip.and_then(parse_routable) {
            let key = format!("vel:ip:{ip}:{bucket}");
            match self.store.incr_expire(&key, ttl).await {
                Ok(count) => {
                    if count > self.config.ip_limit {
                        breach = true;
                    }
                }
                Err(e) => {
                    warn!(probe = "velocity", kind = "store", error = %e, "ip counter unavailable");
                    return None;
                }
            }
        }

        if !self.config.provider_allowlist.contains(domain) {
            let key = format!("vel:domain:{domain}:{bucket}");
            match self.store.incr_expire(&key, ttl).await {
                Ok(count) => {
                    if count > self.config.domain_limit {
                        breach = true;
                    }
                }
                Err(e) => {
                    warn!(probe = "velocity", kind = "store", error = %e, "domain counter unavailable");
                    return None;
                }
            }
        }

        Some(breach)
    }
}

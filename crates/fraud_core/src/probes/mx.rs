//! MX lookup with store-backed caching.

use crate::store::KvStore;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MxConfig {
    pub timeout: Duration,
    /// Cache TTL for domains that do have MX records.
    pub positive_ttl: Duration,
    /// Cache TTL for negative results; kept very short so a fresh DNS setup
    /// is picked up quickly.
    pub negative_ttl: Duration,
}

impl Default for MxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            positive_ttl: Duration::from_secs(24 * 3600),
            negative_ttl: Duration::from_secs(2),
        }
    }
}

/// Answers "can this domain receive mail at all".
pub struct MxProber {
    resolver: Arc<TokioAsyncResolver>,
    store: Arc<dyn KvStore>,
    config: MxConfig,
}

impl MxProber {
    pub fn new(
        resolver: Arc<TokioAsyncResolver>,
        store: Arc<dyn KvStore>,
        config: MxConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            config,
        }
    }

    /// Whether `domain` has at least one MX record. `None` means the lookup
    /// failed after a retry and the caller should treat the signal as
    /// unknown.
    pub async fn has_mx(&self, domain: &str) -> Option<bool> {
        let cache_key = format!("mx:{domain}");
        match self.store.get(&cache_key).await {
            Ok(Some(cached)) => {
                debug!(domain, cached, "mx cache hit");
                return Some(cached == "1");
            }
            Ok(None) => {}
            Err(e) => {
                // Cache bypass, not a probe failure.
                warn!(probe = "mx", kind = "store", error = %e, "mx cache unavailable");
            }
        }

        let found = match self.lookup_with_retry(domain).await {
            Some(found) => found,
            None => return None,
        };

        let ttl = if found {
            self.config.positive_ttl
        } else {
            self.config.negative_ttl
        };
        if let Err(e) = self
            .store
            .set(&cache_key, if found { "1" } else { "0" }, Some(ttl))
            .await
        {
            warn!(probe = "mx", kind = "store", error = %e, "mx cache write failed");
        }
        Some(found)
    }

    async fn lookup_with_retry(&self, domain: &str) -> Option<bool> {
        for attempt in 0..2 {
            match tokio::time::timeout(self.config.timeout, self.resolver.mx_lookup(domain)).await
            {
                Ok(Ok(answers)) => {
                    let count = answers.iter().count();
                    debug!(domain, count, "mx lookup answered");
                    return Some(count > 0);
                }
                Ok(Err(e)) => {
                    // NXDOMAIN / empty answer is a definitive "no MX", not an
                    // infrastructure failure.
                    if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                        debug!(domain, "no mx records");
                        return Some(false);
                    }
                    warn!(probe = "mx", kind = "resolve", domain, attempt, error = %e, "mx lookup failed");
                }
                Err(_) => {
                    warn!(probe = "mx", kind = "timeout", domain, attempt, "mx lookup timed out");
                }
            }
        }
        None
    }
}

//! Disposable-domain registry.
//!
//! Seeded from a packaged list at startup, optionally unioned with a remote
//! blocklist, then frozen behind a Bloom filter for O(1) membership checks.
//! Failure to fetch the remote list is non-fatal; the packaged seed always
//! loads.

use anyhow::Result;
use fastbloom::BloomFilter;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Packaged seed list, embedded at build time.
pub const SEED_LIST: &str = include_str!("../disposable_domains.txt");

const REMOTE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable set of known disposable-mailbox domains.
pub struct DisposableRegistry {
    filter: BloomFilter,
    domain_count: usize,
}

impl DisposableRegistry {
    /// Build a registry from an explicit domain set.
    pub fn new(domains: HashSet<String>, false_positive_rate: f64) -> Result<Self> {
        if domains.is_empty() {
            return Err(anyhow::anyhow!("no domains provided for disposable registry"));
        }
        let domain_count = domains.len();
        let filter = BloomFilter::with_false_pos(false_positive_rate).items(domains.into_iter());
        info!(domains = domain_count, "disposable registry initialized");
        Ok(Self {
            filter,
            domain_count,
        })
    }

    /// Build a registry from a newline-separated list.
    pub fn from_list(list: &str, false_positive_rate: f64) -> Result<Self> {
        Self::new(parse_domain_list(list), false_positive_rate)
    }

    /// Build the registry from the packaged seed, unioned with the remote
    /// blocklist when a URL is configured and reachable.
    pub async fn load(
        seed: &str,
        remote_url: Option<&str>,
        false_positive_rate: f64,
    ) -> Result<Self> {
        let mut domains = parse_domain_list(seed);
        let seed_count = domains.len();

        if let Some(url) = remote_url {
            match fetch_remote_list(url).await {
                Ok(remote) => {
                    let before = domains.len();
                    domains.extend(remote);
                    info!(
                        url,
                        added = domains.len() - before,
                        "merged remote disposable-domain list"
                    );
                }
                Err(e) => {
                    warn!(url, error = %e, "remote disposable list unavailable, continuing with packaged seed");
                }
            }
        }

        debug!(seed = seed_count, total = domains.len(), "disposable domain set assembled");
        Self::new(domains, false_positive_rate)
    }

    /// Whether `domain` is a known disposable provider. May return rare false
    /// positives at the configured filter rate, never false negatives.
    pub fn is_disposable(&self, domain: &str) -> bool {
        self.filter.contains(&domain.to_lowercase())
    }

    pub fn domain_count(&self) -> usize {
        self.domain_count
    }
}

async fn fetch_remote_list(url: &str) -> Result<HashSet<String>> {
    let client = reqwest::Client::builder()
        .timeout(REMOTE_FETCH_TIMEOUT)
        .build()?;
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let domains = parse_domain_list(&body);
    if domains.is_empty() {
        return Err(anyhow::anyhow!("remote list at {url} contained no domains"));
    }
    Ok(domains)
}

/// Parse a one-domain-per-line list, skipping blanks and `#` comments.
fn parse_domain_list(content: &str) -> HashSet<String> {
    let mut domains = HashSet::new();
    let mut skipped = 0usize;
    for line in content.lines() {
        let domain = line.trim();
        if domain.is_empty() || domain.starts_with('#') {
            continue;
        }
        if domain.contains('.') && !domain.contains(char::is_whitespace) {
            domains.insert(domain.to_lowercase());
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped malformed entries in disposable-domain list");
    }
    domains
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn packaged_seed_parses() {
        let domains = parse_domain_list(SEED_LIST);
        assert!(domains.len() > 50);
        assert!(domains.contains("mailinator.com"));
        assert!(domains.contains("yopmail.com"));
    }

    #[test]
    fn membership_is_case_insensitive() {
        let registry = DisposableRegistry::from_list(SEED_LIST, 0.0001).unwrap();
        assert!(registry.is_disposable("mailinator.com"));
        assert!(registry.is_disposable("MAILINATOR.COM"));
        assert!(!registry.is_disposable("gmail.com"));
    }

    #[test]
    fn comments_and_garbage_are_skipped() {
        let list = "# header\n\nmailinator.com\nno-dot\nhas space.com\nYopmail.com\n";
        let domains = parse_domain_list(list);
        assert_eq!(domains.len(), 2);
        assert!(domains.contains("mailinator.com"));
        assert!(domains.contains("yopmail.com"));
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(DisposableRegistry::from_list("# nothing\n", 0.01).is_err());
    }

    #[tokio::test]
    async fn load_without_remote_uses_seed() {
        let registry = DisposableRegistry::load(SEED_LIST, None, 0.0001)
            .await
            .unwrap();
        assert!(registry.domain_count() > 50);
        assert!(registry.is_disposable("guerrillamail.com"));
    }
}

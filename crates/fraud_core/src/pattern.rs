//! Suspicious naming-pattern detection.
//!
//! Three sub-checks over the normalized email: a multi-digit number suffix,
//! sequential neighbors of the same stem (user4 after user1..user3), and
//! Levenshtein similarity against a bounded per-domain window of recently
//! seen addresses.

use crate::envelope::PatternKind;
use crate::normalizer::ParsedEmail;
use crate::store::KvStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use textdistance::str::levenshtein;
use tracing::{debug, warn};

static NUMBER_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z].*\d{2,}$").expect("number-suffix regex"));

/// How far around the observed trailing number the sequential check looks.
const SEQUENTIAL_NEIGHBORHOOD: u64 = 5;

#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Similarity ratio (1 - dist/max_len) at which two emails are "similar".
    pub similarity_threshold: f64,
    /// Cardinality bound of each per-domain recent window.
    pub window_size: usize,
    /// Expiry of an idle window.
    pub window_ttl: Duration,
    /// Expiry of the per-domain insert lock token.
    pub lock_ttl: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            window_size: 500,
            window_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(3),
        }
    }
}

/// Outcome of the pattern sub-checks. The window-backed checks are `None`
/// when the store could not be read; the suffix check is pure and always
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternReport {
    pub is_sequential: Option<bool>,
    pub has_number_suffix: bool,
    pub is_similar_to_recent: Option<bool>,
    pub pattern: Option<PatternKind>,
}

pub struct PatternDetector {
    store: Arc<dyn KvStore>,
    config: PatternConfig,
}

fn window_key(domain: &str) -> String {
    format!("recent:{domain}")
}

fn lock_key(domain: &str) -> String {
    format!("lock:recent:{domain}")
}

impl PatternDetector {
    pub fn new(store: Arc<dyn KvStore>, config: PatternConfig) -> Self {
        Self { store, config }
    }

    /// Run all three sub-checks against the domain's recent window.
    pub async fn analyze(&self, parsed: &ParsedEmail) -> PatternReport {
        let has_number_suffix = NUMBER_SUFFIX.is_match(&parsed.local_part);

        let window = match self.store.list_range(&window_key(&parsed.domain)).await {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(probe = "pattern", kind = "store", error = %e, "recent window unavailable");
                None
            }
        };

        let (is_sequential, is_similar_to_recent) = match &window {
            Some(entries) => (
                Some(self.is_sequential(parsed, entries)),
                Some(self.is_similar(parsed, entries)),
            ),
            None => (None, None),
        };

        let pattern = if is_sequential == Some(true) {
            Some(PatternKind::Sequential)
        } else if has_number_suffix {
            Some(PatternKind::NumberSuffix)
        } else if is_similar_to_recent == Some(true) {
            Some(PatternKind::SimilarToRecent)
        } else {
            None
        };

        if let Some(kind) = pattern {
            debug!(email = %parsed.normalized, ?kind, "suspicious pattern detected");
        }

        PatternReport {
            is_sequential,
            has_number_suffix,
            is_similar_to_recent,
            pattern,
        }
    }

    /// Record a scored email into its domain window.
    ///
    /// Inserts are serialized with a short-lived lock token so concurrent
    /// writers cannot blow the cardinality bound; readers stay lock-free.
    /// Window membership is a set: an email already present is not re-added.
    pub async fn record(&self, parsed: &ParsedEmail) {
        let lock = lock_key(&parsed.domain);
        let mut held = false;
        for _ in 0..3 {
            match self.store.acquire_lock(&lock, self.config.lock_ttl).await {
                Ok(true) => {
                    held = true;
                    break;
                }
                Ok(false) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(e) => {
                    warn!(probe = "pattern", kind = "store", error = %e, "window lock unavailable");
                    return;
                }
            }
        }
        if !held {
            // Contention beyond the retry budget: skip this insert rather
            // than risk exceeding the window bound.
            debug!(domain = %parsed.domain, "recent-window lock contended, insert skipped");
            return;
        }

        let key = window_key(&parsed.domain);
        let already_present = match self.store.list_range(&key).await {
            Ok(entries) => entries.iter().any(|e| e == &parsed.normalized),
            Err(_) => false,
        };
        if !already_present {
            if let Err(e) = self
                .store
                .list_push_trim(
                    &key,
                    &parsed.normalized,
                    self.config.window_size,
                    Some(self.config.window_ttl),
                )
                .await
            {
                warn!(probe = "pattern", kind = "store", error = %e, "recent window insert failed");
            }
        }

        if let Err(e) = self.store.release_lock(&lock).await {
            warn!(probe = "pattern", kind = "store", error = %e, "window lock release failed");
        }
    }

    fn is_sequential(&self, parsed: &ParsedEmail, window: &[String]) -> bool {
        let (stem, Some(last)) = split_trailing_digits(&parsed.local_part) else {
            return false;
        };
        let lo = last.saturating_sub(SEQUENTIAL_NEIGHBORHOOD).max(1);
        let hi = last.saturating_add(SEQUENTIAL_NEIGHBORHOOD);
        for n in lo..=hi {
            if n == last {
                continue;
            }
            let candidate = format!("{stem}{n}@{domain}", domain = parsed.domain);
            if window.iter().any(|e| e == &candidate) {
                return true;
            }
        }
        false
    }

    fn is_similar(&self, parsed: &ParsedEmail, window: &[String]) -> bool {
        for entry in window {
            if entry == &parsed.normalized {
                // A resubmission of the exact same address is not "similar".
                continue;
            }
            let dist = levenshtein(&parsed.normalized, entry);
            let max_len = parsed.normalized.chars().count().max(entry.chars().count());
            if max_len == 0 {
                continue;
            }
            let similarity = 1.0 - dist as f64 / max_len as f64;
            if similarity >= self.config.similarity_threshold {
                debug!(
                    email = %parsed.normalized,
                    recent = %entry,
                    similarity = format!("{similarity:.2}"),
                    "similar recent email"
                );
                return true;
            }
        }
        false
    }
}

/// Split trailing ASCII digits off a local-part. Returns the stem and the
/// parsed number, `None` when there is no usable numeric suffix.
fn split_trailing_digits(local: &str) -> (&str, Option<u64>) {
    let digits_at = local
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (stem, digits) = local.split_at(digits_at);
    if digits.is_empty() {
        return (stem, None);
    }
    (stem, digits.parse::<u64>().ok())
}

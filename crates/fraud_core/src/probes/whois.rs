//! Domain registration age via WHOIS.
//!
//! Queries whois.iana.org for the authoritative registry, follows the
//! referral, and extracts the first reliable creation date. Freshly
//! registered domains are a strong throwaway-signup signal.

use crate::envelope::Signals;
use crate::probes::{Probe, ProbeInput};
use crate::store::KvStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const IANA_WHOIS: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;

#[derive(Debug, Clone)]
pub struct WhoisConfig {
    pub timeout: Duration,
    pub cache_ttl: Duration,
    /// TTL for cached lookup failures, so broken registries are not hammered.
    pub negative_ttl: Duration,
    /// Domains at or below this age are flagged as new.
    pub new_domain_days: i64,
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(24 * 3600),
            negative_ttl: Duration::from_secs(3600),
            new_domain_days: 30,
        }
    }
}

pub struct WhoisProber {
    store: Arc<dyn KvStore>,
    config: WhoisConfig,
}

impl WhoisProber {
    pub fn new(store: Arc<dyn KvStore>, config: WhoisConfig) -> Self {
        Self { store, config }
    }

    /// Age of the domain in days, `None` when WHOIS gave no usable creation
    /// date. The creation date (not the age) is cached so entries stay valid
    /// for their whole TTL.
    pub async fn age_days(&self, domain: &str) -> Option<i64> {
        let cache_key = format!("whois:{domain}");
        match self.store.get(&cache_key).await {
            Ok(Some(cached)) => {
                debug!(domain, "whois cache hit");
                return match cached.as_str() {
                    "none" => None,
                    value => DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|created| age_from(created.with_timezone(&Utc))),
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(probe = "whois", kind = "store", error = %e, "whois cache unavailable");
            }
        }

        let created = self.lookup_creation_date(domain).await;
        let (value, ttl) = match created {
            Some(date) => (date.to_rfc3339(), self.config.cache_ttl),
            None => ("none".to_string(), self.config.negative_ttl),
        };
        if let Err(e) = self.store.set(&cache_key, &value, Some(ttl)).await {
            warn!(probe = "whois", kind = "store", error = %e, "whois cache write failed");
        }

        created.map(age_from)
    }

    async fn lookup_creation_date(&self, domain: &str) -> Option<DateTime<Utc>> {
        match tokio::time::timeout(self.config.timeout, query_with_referral(domain)).await {
            Ok(Ok(response)) => {
                let created = find_creation_date(&response);
                if created.is_none() {
                    debug!(domain, "whois response had no creation date");
                }
                created
            }
            Ok(Err(e)) => {
                warn!(probe = "whois", kind = "transport", domain, error = %e, "whois query failed");
                None
            }
            Err(_) => {
                warn!(probe = "whois", kind = "timeout", domain, "whois query timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Probe for WhoisProber {
    fn name(&self) -> &'static str {
        "whois"
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn run(&self, input: &ProbeInput) -> Option<Signals> {
        let age = self.age_days(&input.email.domain).await?;
        Some(Signals {
            domain_age_days: Some(age),
            is_new_domain: Some(age <= self.config.new_domain_days),
            ..Signals::default()
        })
    }
}

fn age_from(created: DateTime<Utc>) -> i64 {
    (Utc::now() - created).num_days()
}

/// Query IANA for the TLD registry, then the registry itself.
async fn query_with_referral(domain: &str) -> anyhow::Result<String> {
    let iana_response = query_server(IANA_WHOIS, domain).await?;
    let server = referral_server(&iana_response);
    match server {
        Some(server) => {
            debug!(domain, server, "following whois referral");
            query_server(&server, domain).await
        }
        // Some TLDs answer directly from IANA's data.
        None => Ok(iana_response),
    }
}

async fn query_server(server: &str, query: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect((server, WHOIS_PORT)).await?;
    stream.write_all(query.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn referral_server(response: &str) -> Option<String> {
    for line in response.lines() {
        let lower = line.trim().to_lowercase();
        if let Some(value) = lower.strip_prefix("refer:") {
            let server = value.trim();
            if !server.is_empty() {
                return Some(server.to_string());
            }
        }
    }
    None
}

/// Labels registries use for the registration date, roughly in order of
/// prevalence across gTLD and ccTLD registries.
const CREATION_KEYS: &[&str] = &[
    "creation date:",
    "created:",
    "created on:",
    "registered on:",
    "registered:",
    "registration time:",
    "domain record activated:",
    "domain create date:",
];

/// First (earliest) parseable creation date in a WHOIS response.
fn find_creation_date(response: &str) -> Option<DateTime<Utc>> {
    let mut earliest: Option<DateTime<Utc>> = None;
    for line in response.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        for key in CREATION_KEYS {
            if let Some(idx) = lower.find(key) {
                let Some(rest) = trimmed.get(idx + key.len()..) else {
                    continue;
                };
                if let Some(parsed) = parse_whois_date(rest.trim()) {
                    earliest = Some(match earliest {
                        Some(existing) if existing <= parsed => existing,
                        _ => parsed,
                    });
                }
            }
        }
    }
    earliest
}

fn parse_whois_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches(" UTC").trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y.%m.%d %H:%M:%S",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y", "%Y/%m/%d"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&midnight));
        }
    }

    None
}

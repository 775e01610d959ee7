//! IP intelligence: geolocation plus VPN / proxy / datacenter classification.
//!
//! Providers are tried in configured order; the first successful answer wins.
//! Each provider has its own request budget and a token bucket sized to stay
//! under free-tier quotas: a depleted bucket fails fast instead of queueing.

use crate::envelope::Signals;
use crate::net::is_non_routable;
use crate::probes::{Probe, ProbeInput};
use crate::store::KvStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Organisation keywords marking consumer VPN / proxy exits.
static VPN_KEYWORDS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["vpn", "proxy", "tor exit", "anonymous"]);

/// Organisation keywords marking hosting / cloud ranges.
static DATACENTER_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "hosting",
        "cloud",
        "datacenter",
        "data center",
        "dedicated",
        "colocation",
        "server",
        "amazon",
        "aws",
        "google cloud",
        "azure",
        "digitalocean",
        "ovh",
        "linode",
        "vultr",
        "hetzner",
        "alibaba",
        "oracle",
    ]
});

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// https://ipapi.co/{ip}/json/
    IpapiCo,
    /// https://ipwho.is/{ip}
    Ipwhois,
    /// http://ip-api.com/json/{ip} (plain HTTP)
    IpapiHttp,
}

impl ProviderKind {
    fn url(&self, ip: &IpAddr) -> String {
        match self {
            ProviderKind::IpapiCo => format!("https://ipapi.co/{ip}/json/"),
            ProviderKind::Ipwhois => format!("https://ipwho.is/{ip}"),
            ProviderKind::IpapiHttp => format!(
                "http://ip-api.com/json/{ip}?fields=status,country,org,isp,as,hosting,proxy"
            ),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProviderKind::IpapiCo => "ipapi_co",
            ProviderKind::Ipwhois => "ipwhois",
            ProviderKind::IpapiHttp => "ipapi_http",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ipapi_co" | "ipapi.co" => Ok(ProviderKind::IpapiCo),
            "ipwhois" | "ipwho.is" => Ok(ProviderKind::Ipwhois),
            "ipapi_http" | "ip-api.com" => Ok(ProviderKind::IpapiHttp),
            other => Err(format!("unknown ip intelligence provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IpIntelConfig {
    /// Primary provider followed by fallbacks, tried in order.
    pub providers: Vec<ProviderKind>,
    /// Budget per provider attempt.
    pub provider_timeout: Duration,
    pub cache_ttl: Duration,
    pub verify_tls: bool,
    /// Token-bucket refill per provider.
    pub requests_per_minute: u32,
}

impl Default for IpIntelConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderKind::IpapiCo,
                ProviderKind::Ipwhois,
                ProviderKind::IpapiHttp,
            ],
            provider_timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(3600),
            verify_tls: true,
            requests_per_minute: 45,
        }
    }
}

/// What we know about one IP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpIntelRecord {
    pub country: Option<String>,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_datacenter: bool,
    pub org: Option<String>,
    pub asn: Option<String>,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = (requests_per_minute as f64 / 6.0).max(1.0);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: requests_per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct IpIntelProber {
    client: reqwest::Client,
    store: Arc<dyn KvStore>,
    config: IpIntelConfig,
    /// One bucket per configured provider, index-aligned with
    /// `config.providers`.
    buckets: Vec<Mutex<TokenBucket>>,
}

impl IpIntelProber {
    pub fn new(store: Arc<dyn KvStore>, config: IpIntelConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        let buckets = config
            .providers
            .iter()
            .map(|_| Mutex::new(TokenBucket::new(config.requests_per_minute)))
            .collect();
        Ok(Self {
            client,
            store,
            config,
            buckets,
        })
    }

    /// Look up one IP. Private and otherwise non-routable addresses return a
    /// sentinel record with every flag false; `None` means every provider
    /// failed.
    pub async fn lookup(&self, ip: &str) -> Option<IpIntelRecord> {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                warn!(probe = "ipintel", kind = "parse", ip, "unparseable ip");
                return None;
            }
        };
        if is_non_routable(&addr) {
            debug!(ip, "skipping ip intelligence for non-routable address");
            return Some(IpIntelRecord::default());
        }

        let cache_key = format!("ipintel:{addr}");
        match self.store.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(record) = serde_json::from_str::<IpIntelRecord>(&cached) {
                    debug!(ip, "ipintel cache hit");
                    return Some(record);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(probe = "ipintel", kind = "store", error = %e, "ipintel cache unavailable");
            }
        }

        for (idx, provider) in self.config.providers.iter().enumerate() {
            if !self.take_token(idx) {
                warn!(
                    probe = "ipintel",
                    kind = "rate_limited",
                    provider = provider.label(),
                    "token bucket depleted, skipping provider"
                );
                continue;
            }
            match self.query_provider(*provider, &addr).await {
                Some(record) => {
                    if let Ok(json) = serde_json::to_string(&record) {
                        if let Err(e) = self
                            .store
                            .set(&cache_key, &json, Some(self.config.cache_ttl))
                            .await
                        {
                            warn!(probe = "ipintel", kind = "store", error = %e, "ipintel cache write failed");
                        }
                    }
                    return Some(record);
                }
                None => continue,
            }
        }

        warn!(probe = "ipintel", kind = "all_providers_failed", ip, "no provider answered");
        None
    }

    fn take_token(&self, idx: usize) -> bool {
        self.buckets
            .get(idx)
            .and_then(|bucket| bucket.lock().ok().map(|mut b| b.try_take()))
            .unwrap_or(false)
    }

    async fn query_provider(&self, provider: ProviderKind, addr: &IpAddr) -> Option<IpIntelRecord> {
        let url = provider.url(addr);
        let response = match tokio::time::timeout(
            self.config.provider_timeout,
            self.client.get(&url).send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(probe = "ipintel", kind = "transport", provider = provider.label(), error = %e, "provider request failed");
                return None;
            }
            Err(_) => {
                warn!(
                    probe = "ipintel",
                    kind = "timeout",
                    provider = provider.label(),
                    "provider timed out"
                );
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                probe = "ipintel",
                kind = "status",
                provider = provider.label(),
                status = response.status().as_u16(),
                "provider returned error status"
            );
            return None;
        }
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(probe = "ipintel", kind = "parse", provider = provider.label(), error = %e, "provider body unreadable");
                return None;
            }
        };
        parse_provider_response(provider, &body)
    }
}

/// Map a provider body onto our record, preferring provider-supplied booleans
/// and falling back to organisation-keyword classification.
fn parse_provider_response(provider: ProviderKind, body: &Value) -> Option<IpIntelRecord> {
    let mut record = IpIntelRecord::default();
    match provider {
        ProviderKind::IpapiCo => {
            if body.get("error").and_then(Value::as_bool) == Some(true) {
                return None;
            }
            record.country = string_field(body, "country_name");
            record.org = string_field(body, "org");
            record.asn = string_field(body, "asn");
        }
        ProviderKind::Ipwhois => {
            if body.get("success").and_then(Value::as_bool) == Some(false) {
                return None;
            }
            record.country = string_field(body, "country");
            let connection = body.get("connection");
            record.org = connection
                .and_then(|c| string_field(c, "org"))
                .or_else(|| connection.and_then(|c| string_field(c, "isp")));
            record.asn = connection
                .and_then(|c| c.get("asn"))
                .and_then(Value::as_i64)
                .map(|asn| format!("AS{asn}"));
            if let Some(security) = body.get("security") {
                record.is_vpn = security.get("vpn").and_then(Value::as_bool).unwrap_or(false);
                record.is_proxy = security
                    .get("proxy")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            }
        }
        ProviderKind::IpapiHttp => {
            if body.get("status").and_then(Value::as_str) != Some("success") {
                return None;
            }
            record.country = string_field(body, "country");
            record.org = string_field(body, "org").or_else(|| string_field(body, "isp"));
            record.asn = string_field(body, "as");
            record.is_proxy = body.get("proxy").and_then(Value::as_bool).unwrap_or(false);
            record.is_datacenter = body.get("hosting").and_then(Value::as_bool).unwrap_or(false);
        }
    }
    classify_by_org(&mut record);
    Some(record)
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn classify_by_org(record: &mut IpIntelRecord) {
    let org = record.org.as_deref().unwrap_or("").to_lowercase();
    if org.is_empty() {
        return;
    }
    if VPN_KEYWORDS.iter().any(|k| org.contains(k)) {
        record.is_vpn = true;
        record.is_proxy = true;
    }
    if DATACENTER_KEYWORDS.iter().any(|k| org.contains(k)) {
        record.is_datacenter = true;
    }
}

#[async_trait]
impl Probe for IpIntelProber {
    fn name(&self) -> &'static str {
        "ipintel"
    }

    fn timeout(&self) -> Duration {
        // The whole provider chain, worst case.
        self.config.provider_timeout * self.config.providers.len().max(1) as u32
    }

    async fn run(&self, input: &ProbeInput) -> Option<Signals> {
        let ip = input.ip.as_deref()?;
        let record = self.lookup(ip).await?;
        Some(Signals {
            is_vpn: Some(record.is_vpn),
            is_proxy: Some(record.is_proxy),
            is_datacenter: Some(record.is_datacenter),
            ip_country: record.country,
            ..Signals::default()
        })
    }
}

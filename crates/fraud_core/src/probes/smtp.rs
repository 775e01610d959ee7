//! Mailbox-level SMTP probing. Disabled by default: RCPT verification is
//! slow, grey-area with some operators, and advisory at best.
//!
//! Dialog: connect to the best-preference MX, EHLO, MAIL FROM, RCPT TO the
//! target, then RCPT TO a random local-part on the same domain to detect
//! catch-all acceptance. Any 4xx/5xx is recorded without retry; transport
//! failures yield no verdict at all.

use crate::envelope::Signals;
use crate::probes::{Probe, ProbeInput};
use crate::store::KvStore;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const SMTP_PORT: u16 = 25;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub enabled: bool,
    /// MAIL FROM address used for the probe.
    pub sender: String,
    /// EHLO identity.
    pub helo_host: String,
    /// Hard deadline for the whole dialog.
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sender: "verify@example.com".to_string(),
            helo_host: "verifier.local".to_string(),
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one mailbox probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpVerdict {
    pub valid: bool,
    pub deliverable: bool,
    pub catch_all: bool,
}

pub struct SmtpProber {
    resolver: Arc<TokioAsyncResolver>,
    store: Arc<dyn KvStore>,
    config: SmtpConfig,
}

impl SmtpProber {
    pub fn new(
        resolver: Arc<TokioAsyncResolver>,
        store: Arc<dyn KvStore>,
        config: SmtpConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            config,
        }
    }

    /// Probe deliverability of `email` (normalized form). `None` on transport
    /// failure or when the domain has no MX to talk to.
    pub async fn probe(&self, email: &str, domain: &str) -> Option<SmtpVerdict> {
        let cache_key = format!("smtp:{email}");
        match self.store.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(verdict) = serde_json::from_str::<SmtpVerdict>(&cached) {
                    debug!(email, "smtp cache hit");
                    return Some(verdict);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(probe = "smtp", kind = "store", error = %e, "smtp cache unavailable");
            }
        }

        let mx_host = self.best_mx(domain).await?;
        let verdict = match tokio::time::timeout(
            self.config.timeout,
            self.dialog(&mx_host, email, domain),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(probe = "smtp", kind = "transport", domain, error = %e, "smtp dialog failed");
                return None;
            }
            Err(_) => {
                warn!(probe = "smtp", kind = "timeout", domain, "smtp dialog timed out");
                return None;
            }
        };

        if let Ok(json) = serde_json::to_string(&verdict) {
            if let Err(e) = self
                .store
                .set(&cache_key, &json, Some(self.config.cache_ttl))
                .await
            {
                warn!(probe = "smtp", kind = "store", error = %e, "smtp cache write failed");
            }
        }
        Some(verdict)
    }

    async fn best_mx(&self, domain: &str) -> Option<String> {
        match self.resolver.mx_lookup(domain).await {
            Ok(answers) => {
                let mut hosts: Vec<_> = answers
                    .iter()
                    .map(|mx| (mx.preference(), mx.exchange().to_utf8()))
                    .collect();
                hosts.sort_by_key(|(preference, _)| *preference);
                hosts
                    .into_iter()
                    .next()
                    .map(|(_, host)| host.trim_end_matches('.').to_string())
            }
            Err(e) => {
                debug!(domain, error = %e, "no mx host for smtp probe");
                None
            }
        }
    }

    async fn dialog(&self, mx_host: &str, email: &str, domain: &str) -> anyhow::Result<SmtpVerdict> {
        let stream = TcpStream::connect((mx_host, SMTP_PORT)).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = read_reply(&mut reader).await?;
        if greeting != 220 {
            anyhow::bail!("unexpected greeting {greeting} from {mx_host}");
        }

        send_command(&mut write_half, &format!("EHLO {}", self.config.helo_host)).await?;
        let ehlo = read_reply(&mut reader).await?;
        if ehlo != 250 {
            anyhow::bail!("EHLO rejected with {ehlo}");
        }

        send_command(&mut write_half, &format!("MAIL FROM:<{}>", self.config.sender)).await?;
        let mail = read_reply(&mut reader).await?;
        if mail != 250 {
            anyhow::bail!("MAIL FROM rejected with {mail}");
        }

        send_command(&mut write_half, &format!("RCPT TO:<{email}>")).await?;
        let rcpt = read_reply(&mut reader).await?;

        let random_email = format!("{}@{domain}", random_local_part());
        send_command(&mut write_half, &format!("RCPT TO:<{random_email}>")).await?;
        let rcpt_random = read_reply(&mut reader).await?;

        // Best effort; many servers close immediately.
        let _ = send_command(&mut write_half, "QUIT").await;

        let accepted = matches!(rcpt, 250 | 251);
        let catch_all = matches!(rcpt_random, 250 | 251);
        debug!(email, rcpt, rcpt_random, "smtp probe verdict");

        Ok(SmtpVerdict {
            valid: accepted,
            deliverable: accepted,
            catch_all,
        })
    }
}

async fn send_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &str) -> anyhow::Result<()> {
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one (possibly multi-line) SMTP reply and return its status code.
async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<u16> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("connection closed mid-reply");
        }
        let bytes = line.as_bytes();
        if bytes.len() < 3 {
            anyhow::bail!("malformed reply line: {line:?}");
        }
        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("malformed reply code: {line:?}"))?;
        // "250-..." marks a continuation line, "250 ..." (or bare "250") ends
        // the reply.
        if bytes.get(3) != Some(&b'-') {
            return Ok(code);
        }
    }
}

fn random_local_part() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(14)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("probe-{suffix}")
}

#[async_trait]
impl Probe for SmtpProber {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn run(&self, input: &ProbeInput) -> Option<Signals> {
        let verdict = self
            .probe(&input.email.normalized, &input.email.domain)
            .await?;
        Some(Signals {
            smtp_valid: Some(verdict.valid),
            smtp_deliverable: Some(verdict.deliverable),
            catch_all_domain: Some(verdict.catch_all),
            ..Signals::default()
        })
    }
}

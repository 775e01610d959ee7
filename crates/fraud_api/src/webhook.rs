//! Webhook delivery for risky signups.
//!
//! MEDIUM and HIGH envelopes are posted to every configured URL with
//! at-least-once semantics: three attempts per URL with exponential backoff.
//! Delivery runs on a detached task and can never delay or fail the
//! synchronous response.

use fraud_core::{Envelope, RiskLevel};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const DELIVERY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, verify_tls: bool, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        if urls.is_empty() {
            debug!("no webhook urls configured");
        } else {
            info!(count = urls.len(), "webhook delivery enabled");
        }
        Ok(Self { client, urls })
    }

    /// Queue delivery for an envelope if its level warrants it. Returns
    /// immediately; delivery happens on a detached task.
    pub fn spawn_notify(
        &self,
        envelope: &Envelope,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) {
        if self.urls.is_empty() || envelope.risk_summary.level == RiskLevel::Low {
            return;
        }

        let payload = json!({
            "event": "high_risk_signup",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": {
                "email": envelope.email,
                "normalized_email": envelope.normalized_email,
                "ip_address": ip_address,
                "user_agent": user_agent,
                "risk_summary": envelope.risk_summary,
                "signals": envelope.signals,
                "reasons": envelope.reasons,
            }
        });

        let client = self.client.clone();
        let urls = self.urls.clone();
        tokio::spawn(async move {
            deliver(&client, &urls, payload).await;
        });
    }

    #[cfg(test)]
    async fn deliver_now(&self, payload: serde_json::Value) {
        deliver(&self.client, &self.urls, payload).await;
    }
}

async fn deliver(client: &reqwest::Client, urls: &[String], payload: serde_json::Value) {
    for url in urls {
        let mut delivered = false;
        for attempt in 0..DELIVERY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            match client.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url, attempt, "webhook delivered");
                    delivered = true;
                    break;
                }
                Ok(response) => {
                    warn!(url, attempt, status = response.status().as_u16(), "webhook rejected");
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "webhook delivery failed");
                }
            }
        }
        if !delivered {
            warn!(url, "webhook delivery exhausted all attempts");
        }
    }
}

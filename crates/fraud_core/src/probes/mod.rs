//! Signal probes.
//!
//! Cheap probes (disposable lookup, entropy, patterns, velocity) are called
//! directly by the engine. The slow, network-bound probes behind this
//! module's [`Probe`] trait (WHOIS, IP intelligence, SMTP) are fanned out
//! concurrently and merged fail-open: a probe that errors or misses its
//! deadline contributes nothing.

pub mod ipintel;
pub mod mx;
pub mod smtp;
pub mod whois;

use crate::envelope::Signals;
use crate::normalizer::ParsedEmail;
use async_trait::async_trait;
use std::time::Duration;

/// Input shared by every probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeInput {
    pub email: ParsedEmail,
    pub ip: Option<String>,
}

/// An independent signal producer with its own deadline and failure
/// semantics.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Per-probe deadline; the engine additionally bounds every probe by the
    /// overall analysis budget.
    fn timeout(&self) -> Duration;

    /// Run the probe. Returns a partial [`Signals`] patch with only this
    /// probe's fields set, or `None` on failure (timeout, transport, parse).
    async fn run(&self, input: &ProbeInput) -> Option<Signals>;
}

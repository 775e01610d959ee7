//! Background enrichment: FIFO job queue, poll-by-id result store, and the
//! worker loop that upgrades fast-path envelopes with the slow signals.

use crate::engine::RiskEngine;
use crate::envelope::{EnrichmentInfo, Envelope};
use crate::store::{KvStore, StoreResult};
use crate::AnalysisInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// FIFO queue key shared by producers and workers.
pub const QUEUE_KEY: &str = "jobs:enrich";

/// How long a worker blocks on an empty queue before re-checking shutdown.
const POP_WAIT: Duration = Duration::from_secs(5);

/// Attempts at processing one job before it is marked FAILED.
const MAX_ATTEMPTS: u32 = 3;

pub fn result_key(job_id: &str) -> String {
    format!("result:{job_id}")
}

/// A queued enrichment unit: the original input plus the fast-path envelope
/// the worker will merge slow signals into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub input: AnalysisInput,
    pub partial_envelope: Envelope,
}

/// Enqueue a job and immediately publish the partial envelope at
/// `result:{job_id}` so polling returns something before the worker runs.
pub async fn enqueue_job(
    store: &dyn KvStore,
    input: &AnalysisInput,
    partial_envelope: &Envelope,
    result_ttl: Duration,
) -> StoreResult<String> {
    let job_id = Uuid::new_v4().to_string();
    let mut pending = partial_envelope.clone();
    pending.enrichment = EnrichmentInfo::pending(job_id.clone());

    let job = EnrichmentJob {
        job_id: job_id.clone(),
        created_at: Utc::now(),
        input: input.clone(),
        partial_envelope: pending.clone(),
    };
    let payload = serde_json::to_string(&job).unwrap_or_default();

    store_result(store, &job_id, &pending, result_ttl).await?;
    store.queue_push(QUEUE_KEY, &payload).await?;
    debug!(job_id, "enrichment job enqueued");
    Ok(job_id)
}

pub async fn store_result(
    store: &dyn KvStore,
    job_id: &str,
    envelope: &Envelope,
    ttl: Duration,
) -> StoreResult<()> {
    let json = serde_json::to_string(envelope).unwrap_or_default();
    store.set(&result_key(job_id), &json, Some(ttl)).await
}

/// Envelope previously stored for `job_id`, `None` when unknown or expired.
pub async fn get_result(store: &dyn KvStore, job_id: &str) -> StoreResult<Option<Envelope>> {
    let raw = store.get(&result_key(job_id)).await?;
    Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
}

/// Worker loop: pop jobs, re-run the slow probes, merge, re-score, publish.
///
/// Runs until `shutdown` flips to true. Multiple workers may share the queue;
/// each job has a single writer. `on_complete` fires with the original input
/// and the enriched envelope (webhook fan-out hooks in here).
pub async fn run_worker<F>(
    engine: Arc<RiskEngine>,
    store: Arc<dyn KvStore>,
    result_ttl: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    on_complete: F,
) where
    F: Fn(&AnalysisInput, &Envelope) + Send + Sync,
{
    info!("enrichment worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let popped = tokio::select! {
            _ = shutdown.changed() => break,
            popped = store.queue_pop_wait(QUEUE_KEY, POP_WAIT) => popped,
        };
        let raw = match popped {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "queue unavailable, backing off");
                tokio::time::sleep(POP_WAIT).await;
                continue;
            }
        };

        let job: EnrichmentJob = match serde_json::from_str(&raw) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "dropping undecodable enrichment job");
                continue;
            }
        };

        process_job(&engine, store.as_ref(), &job, result_ttl, &on_complete).await;
    }
    info!("enrichment worker stopped");
}

async fn process_job<F>(
    engine: &RiskEngine,
    store: &dyn KvStore,
    job: &EnrichmentJob,
    result_ttl: Duration,
    on_complete: &F,
) where
    F: Fn(&AnalysisInput, &Envelope) + Send + Sync,
{
    debug!(job_id = %job.job_id, "enrichment job started");
    let mut last_error = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        let enriched = match engine.enrich(&job.input, &job.partial_envelope).await {
            Ok(mut envelope) => {
                envelope.enrichment = EnrichmentInfo::complete(Some(job.job_id.clone()));
                envelope
            }
            Err(e) => {
                // The input was already parsed once on the fast path, so
                // this is unexpected; retrying will not fix bad input.
                error!(job_id = %job.job_id, error = %e, "enrichment failed to re-analyse input");
                last_error = "ENRICH_FAILED".to_string();
                break;
            }
        };

        match store_result(store, &job.job_id, &enriched, result_ttl).await {
            Ok(()) => {
                info!(
                    job_id = %job.job_id,
                    score = enriched.risk_summary.score,
                    "enrichment job complete"
                );
                on_complete(&job.input, &enriched);
                return;
            }
            Err(e) => {
                warn!(job_id = %job.job_id, attempt, error = %e, "result write failed");
                last_error = "RESULT_WRITE_FAILED".to_string();
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }
    }

    // Best effort: leave a FAILED marker for pollers.
    let mut failed = job.partial_envelope.clone();
    failed.enrichment = EnrichmentInfo::failed(job.job_id.clone(), last_error);
    if let Err(e) = store_result(store, &job.job_id, &failed, result_ttl).await {
        error!(job_id = %job.job_id, error = %e, "could not record job failure");
    }
}

use anyhow::Result;
use chrono::Utc;
use coldtrace_common::types::{DeliveryLogEntry, DeliveryOutcome, NotificationJob};
use coldtrace_storage::FacilityStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::backoff::retry_delay;
use crate::error::SendError;
use crate::{ChannelMap, MessagePayload};

/// Consumes the durable notification queue.
///
/// Each tick claims a batch of due jobs (the claim is a conditional
/// `waiting → active` update, so concurrent workers never double-send) and
/// processes them concurrently up to the semaphore limit. Every attempt is
/// recorded in the append-only delivery log before the job row is updated.
pub struct DeliveryWorker {
    store: Arc<FacilityStore>,
    channels: ChannelMap,
    semaphore: Arc<Semaphore>,
    backoff_base: Duration,
    /// Fixed requeue delay after provider throttling; does not consume an
    /// attempt.
    throttle_delay: Duration,
    /// A claim older than this is considered abandoned (worker crashed
    /// before recording an outcome) and goes back to the queue.
    visibility_timeout: Duration,
    batch_size: usize,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<FacilityStore>,
        channels: ChannelMap,
        concurrency: usize,
        backoff_base: Duration,
        throttle_delay: Duration,
        visibility_timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            channels,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            backoff_base,
            throttle_delay,
            visibility_timeout,
            batch_size,
        }
    }

    /// Poll loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.clone().tick().await {
                tracing::error!(error = %e, "delivery worker tick failed");
            }
        }
    }

    /// Claims and processes one batch. Returns the number of jobs claimed.
    pub async fn tick(self: Arc<Self>) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.visibility_timeout)?;
        let recovered = self.store.requeue_stale_jobs(cutoff).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "recovered stale claimed jobs");
        }
        let jobs = self.store.claim_due_jobs(Utc::now(), self.batch_size).await?;
        let claimed = jobs.len();
        for job in jobs {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let worker = self.clone();
            tokio::spawn(async move {
                worker.process_job(job).await;
                drop(permit);
            });
        }
        Ok(claimed)
    }

    /// Runs one claimed job to its next state. Failures in the handling
    /// itself (storage errors) are logged; the job stays `active` and is
    /// not silently lost.
    pub async fn process_job(&self, job: NotificationJob) {
        if let Err(e) = self.handle(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "delivery job handling failed");
        }
    }

    async fn handle(&self, job: &NotificationJob) -> Result<()> {
        let Some(channel) = self.channels.get(&job.channel) else {
            tracing::warn!(job_id = %job.id, channel = %job.channel, "no channel configured");
            self.log_attempt(job, DeliveryOutcome::FatalError, None, None)
                .await?;
            self.store
                .fail_job(&job.id, "channel not configured")
                .await?;
            return Ok(());
        };

        let payload: MessagePayload = match serde_json::from_str(&job.payload) {
            Ok(p) => p,
            Err(e) => {
                self.log_attempt(job, DeliveryOutcome::FatalError, None, None)
                    .await?;
                self.store
                    .fail_job(&job.id, &format!("invalid payload: {e}"))
                    .await?;
                return Ok(());
            }
        };

        match channel.send(&job.recipient, &payload).await {
            Ok(receipt) => {
                self.log_attempt(job, DeliveryOutcome::Sent, None, receipt.message_id.as_deref())
                    .await?;
                self.store.complete_job(&job.id).await?;
                tracing::info!(
                    job_id = %job.id,
                    channel = %job.channel,
                    recipient = %job.recipient,
                    attempt = job.attempts,
                    "notification delivered"
                );
            }
            Err(err @ SendError::RateLimited { .. }) => {
                self.log_attempt(job, err.outcome(), err.provider_code(), None)
                    .await?;
                let next_at = Utc::now() + chrono::Duration::from_std(self.throttle_delay)?;
                self.store
                    .requeue_job_uncounted(&job.id, next_at, &err.to_string())
                    .await?;
                tracing::warn!(
                    job_id = %job.id,
                    channel = %job.channel,
                    "provider throttled, requeued without counting the attempt"
                );
            }
            Err(err @ SendError::Fatal { .. }) => {
                self.log_attempt(job, err.outcome(), err.provider_code(), None)
                    .await?;
                self.store.fail_job(&job.id, &err.to_string()).await?;
                tracing::warn!(
                    job_id = %job.id,
                    recipient = %job.recipient,
                    error = %err,
                    "notification failed permanently"
                );
            }
            Err(err @ SendError::Retryable { .. }) => {
                self.log_attempt(job, err.outcome(), err.provider_code(), None)
                    .await?;
                if job.attempts >= job.max_attempts {
                    self.store
                        .fail_job(&job.id, &format!("retries exhausted: {err}"))
                        .await?;
                    tracing::error!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        error = %err,
                        "notification abandoned after max attempts"
                    );
                } else {
                    let delay = retry_delay(self.backoff_base, job.attempts as u32);
                    let next_at = Utc::now() + chrono::Duration::from_std(delay)?;
                    self.store
                        .requeue_job(&job.id, next_at, &err.to_string())
                        .await?;
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        "notification attempt failed, retry scheduled"
                    );
                }
            }
        }
        Ok(())
    }

    async fn log_attempt(
        &self,
        job: &NotificationJob,
        outcome: DeliveryOutcome,
        provider_error_code: Option<&str>,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        self.store
            .insert_delivery_log(&DeliveryLogEntry {
                id: coldtrace_common::id::next_id(),
                job_id: job.id.clone(),
                attempt_number: job.attempts,
                outcome,
                provider_error_code: provider_error_code.map(str::to_owned),
                provider_message_id: provider_message_id.map(str::to_owned),
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use coldtrace_common::types::{
    Alert, AlertType, Channel, DeliveryLogEntry, DeliveryOutcome, JobStatus, NotificationJob,
};
use coldtrace_storage::FacilityStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::MessagePayload;

/// Turns an alert plus one escalation tier into durable notification jobs.
///
/// Enqueueing is idempotent: the job ID is a hash of
/// (alert, channel, recipient, escalation level), so re-dispatching the
/// same step is a no-op. A per-(recipient, alert type) rate limit
/// suppresses repeat sends inside the configured window; suppressions are
/// recorded in the delivery log as `rate_limited`.
pub struct NotificationDispatcher {
    store: Arc<FacilityStore>,
    rate_limit_window: Duration,
    max_attempts: i32,
}

fn idempotency_key(alert_id: &str, channel: Channel, recipient: &str, level: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{alert_id}|{channel}|{recipient}|{level}"));
    format!("{:x}", hasher.finalize())
}

fn digest_key(date: NaiveDate, channel: Channel, recipient: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("digest|{date}|{channel}|{recipient}"));
    format!("{:x}", hasher.finalize())
}

fn render_payload(alert: &Alert) -> MessagePayload {
    MessagePayload {
        subject: format!(
            "[coldtrace][{}] {} alert for unit {}",
            alert.severity, alert.alert_type, alert.unit_id
        ),
        body: format!(
            "Unit: {unit}\nType: {alert_type}\nSeverity: {severity}\nOpened: {opened}\nAlert ID: {id}",
            unit = alert.unit_id,
            alert_type = alert.alert_type,
            severity = alert.severity,
            opened = alert.opened_at.to_rfc3339(),
            id = alert.id,
        ),
    }
}

impl NotificationDispatcher {
    pub fn new(store: Arc<FacilityStore>, rate_limit_window: Duration, max_attempts: i32) -> Self {
        Self {
            store,
            rate_limit_window,
            max_attempts,
        }
    }

    /// Enqueues notifications for every contact at `level` of the alert's
    /// unit. An empty tier logs a warning; the escalation chain advances
    /// regardless.
    pub async fn dispatch(&self, alert: &Alert, level: i32) -> Result<()> {
        let contacts = self
            .store
            .list_contacts_at_level(&alert.unit_id, level)
            .await?;
        if contacts.is_empty() {
            tracing::warn!(
                unit_id = %alert.unit_id,
                level,
                "no escalation contacts configured at this level"
            );
            return Ok(());
        }

        let payload = serde_json::to_string(&render_payload(alert))?;
        for contact in contacts {
            let key = idempotency_key(&alert.id, contact.channel, &contact.address, level);
            let since = Utc::now() - self.rate_limit_window;
            let recent = self
                .store
                .count_recent_jobs(&contact.address, alert.alert_type, since)
                .await?;

            if recent > 0 {
                self.record_suppression(alert, contact.channel, &contact.address, &key, &payload)
                    .await?;
                continue;
            }

            let inserted = self
                .store
                .insert_job_if_absent(&self.build_job(
                    &alert.id,
                    alert.alert_type,
                    contact.channel,
                    &contact.address,
                    &key,
                    &payload,
                    JobStatus::Waiting,
                ))
                .await?;
            if inserted {
                tracing::info!(
                    alert_id = %alert.id,
                    channel = %contact.channel,
                    recipient = %contact.address,
                    level,
                    "notification enqueued"
                );
            }
        }
        Ok(())
    }

    /// Enqueues one digest message. Keyed by (date, channel, recipient),
    /// so re-running the digest job on the same day is a no-op. Digests
    /// bypass the alert rate limit.
    pub async fn enqueue_digest(
        &self,
        date: NaiveDate,
        channel: Channel,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<bool> {
        let key = digest_key(date, channel, recipient);
        let body = serde_json::to_string(payload)?;
        self.store
            .insert_job_if_absent(&self.build_job(
                &format!("digest-{date}"),
                AlertType::Manual,
                channel,
                recipient,
                &key,
                &body,
                JobStatus::Waiting,
            ))
            .await
    }

    /// Records a rate-limited dispatch: a terminal job row keyed by the
    /// idempotency key plus an audit log entry. Subsequent dispatches of
    /// the same step hit the key and stay silent.
    async fn record_suppression(
        &self,
        alert: &Alert,
        channel: Channel,
        recipient: &str,
        key: &str,
        payload: &str,
    ) -> Result<()> {
        let mut job = self.build_job(
            &alert.id,
            alert.alert_type,
            channel,
            recipient,
            key,
            payload,
            JobStatus::Failed,
        );
        job.last_error = Some(DeliveryOutcome::RateLimited.to_string());
        let inserted = self.store.insert_job_if_absent(&job).await?;
        if !inserted {
            return Ok(());
        }
        self.store
            .insert_delivery_log(&DeliveryLogEntry {
                id: coldtrace_common::id::next_id(),
                job_id: key.to_string(),
                attempt_number: 0,
                outcome: DeliveryOutcome::RateLimited,
                provider_error_code: None,
                provider_message_id: None,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(
            alert_id = %alert.id,
            recipient = %recipient,
            alert_type = %alert.alert_type,
            "notification suppressed by recipient rate limit"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_job(
        &self,
        alert_id: &str,
        alert_type: AlertType,
        channel: Channel,
        recipient: &str,
        key: &str,
        payload: &str,
        status: JobStatus,
    ) -> NotificationJob {
        let now = Utc::now();
        NotificationJob {
            id: key.to_string(),
            alert_id: alert_id.to_string(),
            alert_type,
            channel,
            recipient: recipient.to_string(),
            payload: payload.to_string(),
            attempts: 0,
            max_attempts: self.max_attempts,
            scheduled_at: now,
            status,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

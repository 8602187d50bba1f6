use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use coldtrace_common::types::{
    AlertStatus, Channel, EscalationReminder, ReminderStatus, Severity,
};
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_rules::RuleError;
use coldtrace_storage::FacilityStore;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::NotificationDispatcher;
use crate::MessagePayload;

/// Drives delayed escalation: reminder rows fire after the configured
/// interval, and the alert's status is re-checked at fire time. That
/// re-check, not the best-effort row cancellation, is what guarantees a
/// handled alert never escalates.
pub struct EscalationScheduler {
    store: Arc<FacilityStore>,
    dispatcher: Arc<NotificationDispatcher>,
    resolver: Arc<RuleResolver>,
    digest_recipients: Vec<(Channel, String)>,
}

impl EscalationScheduler {
    pub fn new(
        store: Arc<FacilityStore>,
        dispatcher: Arc<NotificationDispatcher>,
        resolver: Arc<RuleResolver>,
        digest_recipients: Vec<(Channel, String)>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            resolver,
            digest_recipients,
        }
    }

    /// Schedules the reminder that will notify `level` at `due_at` if the
    /// alert is still active then.
    pub async fn schedule_reminder(
        &self,
        alert_id: &str,
        level: i32,
        due_at: DateTime<Utc>,
    ) -> Result<()> {
        self.store.insert_reminder(alert_id, level, due_at).await?;
        tracing::debug!(alert_id = %alert_id, level, due_at = %due_at, "escalation reminder scheduled");
        Ok(())
    }

    /// Best-effort cancellation of pending reminders for a handled alert.
    pub async fn cancel_reminders(&self, alert_id: &str) {
        match self.store.cancel_reminders_for_alert(alert_id).await {
            Ok(n) if n > 0 => {
                tracing::debug!(alert_id = %alert_id, cancelled = n, "escalation reminders cancelled")
            }
            Ok(_) => {}
            Err(e) => {
                // Harmless: the fire-time status re-check drops them anyway.
                tracing::warn!(alert_id = %alert_id, error = %e, "reminder cancellation failed")
            }
        }
    }

    /// Poll loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!(error = %e, "escalation tick failed");
            }
        }
    }

    /// Fires every due reminder. Each reminder is handled independently;
    /// one failure does not block the rest.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_reminders(now, 50).await?;
        let count = due.len();
        for reminder in due {
            if let Err(e) = self.fire(&reminder, now).await {
                tracing::error!(
                    reminder_id = %reminder.id,
                    alert_id = %reminder.alert_id,
                    error = %e,
                    "escalation reminder failed"
                );
            }
        }
        Ok(count)
    }

    async fn fire(&self, reminder: &EscalationReminder, now: DateTime<Utc>) -> Result<()> {
        debug_assert_eq!(reminder.status, ReminderStatus::Pending);
        // Another scheduler instance may have taken it.
        if !self.store.mark_reminder_done(&reminder.id).await? {
            return Ok(());
        }

        let Some(alert) = self.store.get_alert_by_id(&reminder.alert_id).await? else {
            tracing::warn!(alert_id = %reminder.alert_id, "reminder references missing alert");
            return Ok(());
        };
        if alert.status != AlertStatus::Active {
            tracing::debug!(
                alert_id = %alert.id,
                status = %alert.status,
                "alert handled before reminder fired, escalation dropped"
            );
            return Ok(());
        }

        let rules = match self.resolver.resolve(&alert.unit_id).await {
            Ok(r) => r,
            Err(RuleError::ConfigNotFound(unit)) => {
                tracing::warn!(unit_id = %unit, "no rule scope for unit, escalation skipped");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let level = reminder.escalation_level.min(rules.max_escalation_level);
        self.dispatcher.dispatch(&alert, level).await?;
        self.store.set_alert_escalation_level(&alert.id, level).await?;
        tracing::info!(alert_id = %alert.id, level, "alert escalated");

        if level < rules.max_escalation_level {
            let due_at = now + ChronoDuration::minutes(rules.reminder_interval_minutes);
            self.schedule_reminder(&alert.id, level + 1, due_at).await?;
        }
        Ok(())
    }

    /// Enqueues the daily open-alert digest for the configured recipients.
    /// Idempotent per calendar day.
    pub async fn run_digest(&self, now: DateTime<Utc>) -> Result<()> {
        if self.digest_recipients.is_empty() {
            return Ok(());
        }
        let open = self.store.list_open_alerts().await?;

        let critical = open
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count();
        let mut by_type: std::collections::BTreeMap<String, usize> = Default::default();
        for alert in &open {
            *by_type.entry(alert.alert_type.to_string()).or_default() += 1;
        }
        let type_lines: Vec<String> = by_type
            .iter()
            .map(|(t, n)| format!("  {t}: {n}"))
            .collect();
        let payload = MessagePayload {
            subject: format!(
                "[coldtrace] daily digest: {} open alerts ({} critical)",
                open.len(),
                critical
            ),
            body: format!(
                "Open alerts as of {}:\n{}",
                now.to_rfc3339(),
                if type_lines.is_empty() {
                    "  none".to_string()
                } else {
                    type_lines.join("\n")
                }
            ),
        };

        let date = now.date_naive();
        for (channel, recipient) in &self.digest_recipients {
            let enqueued = self
                .dispatcher
                .enqueue_digest(date, *channel, recipient, &payload)
                .await?;
            if enqueued {
                tracing::info!(recipient = %recipient, channel = %channel, "daily digest enqueued");
            }
        }
        Ok(())
    }
}

use chrono::{DateTime, Duration, Utc};
use coldtrace_common::types::{
    AcknowledgeRequest, Alert, AlertCondition, AlertStatus, AlertType, ResolveRequest,
};
use coldtrace_notify::dispatcher::NotificationDispatcher;
use coldtrace_notify::escalation::EscalationScheduler;
use coldtrace_rules::AlertRuleConfig;
use coldtrace_storage::FacilityStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{AlertError, Result};

/// Owns every alert lifecycle transition.
///
/// Reconciliation for one unit is serialized through a per-unit async
/// lock, which is what upholds the at-most-one-open-alert-per-(unit,
/// type) invariant without relying on database uniqueness. Operator
/// transitions additionally run as conditional status updates, so a
/// concurrent acknowledge/resolve can never clobber each other.
///
/// Notification dispatch is fire-and-forget: a provider outage slows
/// deliveries, never evaluation.
pub struct AlertStateMachine {
    store: Arc<FacilityStore>,
    dispatcher: Arc<NotificationDispatcher>,
    escalation: Arc<EscalationScheduler>,
    unit_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AlertStateMachine {
    pub fn new(
        store: Arc<FacilityStore>,
        dispatcher: Arc<NotificationDispatcher>,
        escalation: Arc<EscalationScheduler>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            escalation,
            unit_locks: Mutex::new(HashMap::new()),
        }
    }

    fn unit_lock(&self, unit_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.unit_locks.lock().unwrap();
        locks
            .entry(unit_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Brings the stored alerts for one unit in line with the conditions
    /// the evaluator just computed: opens missing alerts, upgrades
    /// severity, auto-resolves cleared ones. Idempotent; re-running with
    /// the same conditions changes nothing.
    pub async fn reconcile(
        &self,
        unit_id: &str,
        organization_id: &str,
        conditions: &[AlertCondition],
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.unit_lock(unit_id);
        let _guard = lock.lock().await;

        for alert_type in AlertType::ALL {
            let condition = conditions.iter().find(|c| c.alert_type == alert_type);
            let open = self.store.find_open_alert(unit_id, alert_type).await?;

            match (condition, open) {
                (Some(cond), None) => {
                    self.open_alert(unit_id, organization_id, cond, rules, now)
                        .await?;
                }
                (Some(cond), Some(open)) => {
                    // Upgrade only; a calming condition auto-resolves and
                    // re-opens at the lower severity instead of downgrading.
                    if cond.severity > open.severity {
                        self.store
                            .upgrade_alert_severity(&open.id, cond.severity)
                            .await?;
                        tracing::info!(
                            alert_id = %open.id,
                            unit_id = %unit_id,
                            alert_type = %alert_type,
                            severity = %cond.severity,
                            "alert severity upgraded"
                        );
                    }
                }
                (None, Some(open)) => {
                    if self
                        .store
                        .resolve_alert(&open.id, "auto-cleared", None)
                        .await?
                        .is_some()
                    {
                        self.escalation.cancel_reminders(&open.id).await;
                        tracing::info!(
                            alert_id = %open.id,
                            unit_id = %unit_id,
                            alert_type = %alert_type,
                            "alert auto-resolved, condition cleared"
                        );
                    }
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    async fn open_alert(
        &self,
        unit_id: &str,
        organization_id: &str,
        condition: &AlertCondition,
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let alert = self
            .store
            .insert_alert(&Alert {
                id: coldtrace_common::id::next_id(),
                unit_id: unit_id.to_string(),
                organization_id: organization_id.to_string(),
                alert_type: condition.alert_type,
                severity: condition.severity,
                status: AlertStatus::Active,
                opened_at: condition.triggered_at,
                acknowledged_at: None,
                acknowledged_by: None,
                notes: None,
                resolved_at: None,
                resolution: None,
                corrective_action: None,
                last_escalation_level: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::info!(
            alert_id = %alert.id,
            unit_id = %unit_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "alert opened"
        );

        // First contact tier, off the reconcile path.
        let dispatcher = self.dispatcher.clone();
        let dispatched = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&dispatched, 0).await {
                tracing::error!(alert_id = %dispatched.id, error = %e, "initial dispatch failed");
            }
        });

        let due_at = now + Duration::minutes(rules.reminder_interval_minutes);
        if let Err(e) = self.escalation.schedule_reminder(&alert.id, 1, due_at).await {
            tracing::error!(alert_id = %alert.id, error = %e, "failed to schedule escalation reminder");
        }
        Ok(())
    }

    /// `active → acknowledged`. Stops escalation for this alert.
    pub async fn acknowledge(&self, alert_id: &str, req: &AcknowledgeRequest) -> Result<Alert> {
        let alert = self
            .store
            .get_alert_by_id(alert_id)
            .await?
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        let lock = self.unit_lock(&alert.unit_id);
        let _guard = lock.lock().await;

        match self
            .store
            .acknowledge_alert(alert_id, &req.acknowledged_by, req.notes.as_deref())
            .await?
        {
            Some(updated) => {
                self.escalation.cancel_reminders(alert_id).await;
                tracing::info!(
                    alert_id = %alert_id,
                    acknowledged_by = %req.acknowledged_by,
                    "alert acknowledged"
                );
                Ok(updated)
            }
            None => Err(self.transition_error(alert_id, "acknowledge").await?),
        }
    }

    /// `{active, acknowledged} → resolved`. Terminal.
    pub async fn resolve(&self, alert_id: &str, req: &ResolveRequest) -> Result<Alert> {
        let alert = self
            .store
            .get_alert_by_id(alert_id)
            .await?
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        let lock = self.unit_lock(&alert.unit_id);
        let _guard = lock.lock().await;

        match self
            .store
            .resolve_alert(alert_id, &req.resolution, req.corrective_action.as_deref())
            .await?
        {
            Some(updated) => {
                self.escalation.cancel_reminders(alert_id).await;
                tracing::info!(
                    alert_id = %alert_id,
                    resolved_by = %req.resolved_by,
                    resolution = %req.resolution,
                    "alert resolved"
                );
                Ok(updated)
            }
            None => Err(self.transition_error(alert_id, "resolve").await?),
        }
    }

    /// The conditional update matched no row: report the status that was
    /// actually in place.
    async fn transition_error(&self, alert_id: &str, action: &'static str) -> Result<AlertError> {
        let status = self
            .store
            .get_alert_by_id(alert_id)
            .await?
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?
            .status;
        Ok(AlertError::InvalidTransition {
            id: alert_id.to_string(),
            status,
            action,
        })
    }
}

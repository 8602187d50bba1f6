use crate::state::TelemetryRegistry;
use chrono::{Timelike, Utc};
use coldtrace_alert::AlertStateMachine;
use coldtrace_notify::escalation::EscalationScheduler;
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_rules::{evaluator, RuleError};
use coldtrace_storage::FacilityStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Periodic evaluation pass over every unit with a telemetry snapshot.
///
/// Each tick resolves the unit's effective rules, evaluates the pure
/// condition checks, and hands the result to the state machine. Units are
/// isolated: one unit's failure never blocks the rest of the pass.
pub struct ReconcileLoop {
    store: Arc<FacilityStore>,
    resolver: Arc<RuleResolver>,
    machine: Arc<AlertStateMachine>,
    telemetry: Arc<Mutex<TelemetryRegistry>>,
}

impl ReconcileLoop {
    pub fn new(
        store: Arc<FacilityStore>,
        resolver: Arc<RuleResolver>,
        machine: Arc<AlertStateMachine>,
        telemetry: Arc<Mutex<TelemetryRegistry>>,
    ) -> Self {
        Self {
            store,
            resolver,
            machine,
            telemetry,
        }
    }

    /// Poll loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One evaluation pass. Returns the number of units evaluated.
    pub async fn tick(&self) -> usize {
        let units = self
            .telemetry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot();
        let now = Utc::now();
        let mut evaluated = 0usize;

        for (unit_id, snapshot) in units {
            let rules = match self.resolver.resolve(&unit_id).await {
                Ok(r) => r,
                Err(RuleError::ConfigNotFound(_)) => {
                    // Never "no alert": a unit without a scope cannot be
                    // evaluated at all.
                    tracing::warn!(unit_id = %unit_id, "no rule scope for unit, evaluation skipped");
                    continue;
                }
                Err(e) => {
                    tracing::error!(unit_id = %unit_id, error = %e, "rule resolution failed");
                    continue;
                }
            };

            let organization_id = match self.store.get_unit_by_id(&unit_id).await {
                Ok(Some(unit)) => unit.organization_id,
                Ok(None) => {
                    tracing::warn!(unit_id = %unit_id, "unit disappeared, evaluation skipped");
                    continue;
                }
                Err(e) => {
                    tracing::error!(unit_id = %unit_id, error = %e, "unit lookup failed");
                    continue;
                }
            };

            let conditions = evaluator::evaluate(&snapshot, &rules, now);
            if let Err(e) = self
                .machine
                .reconcile(&unit_id, &organization_id, &conditions, &rules, now)
                .await
            {
                tracing::error!(unit_id = %unit_id, error = %e, "alert reconciliation failed");
                continue;
            }
            evaluated += 1;
        }
        evaluated
    }
}

/// Fires the daily digest once the configured UTC hour comes around.
/// The dispatcher's per-day idempotency key absorbs repeated ticks within
/// the hour.
pub async fn run_digest_loop(escalation: Arc<EscalationScheduler>, hour: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        if now.hour() != hour {
            continue;
        }
        if let Err(e) = escalation.run_digest(now).await {
            tracing::error!(error = %e, "daily digest failed");
        }
    }
}

use super::ConditionCheck;
use crate::AlertRuleConfig;
use chrono::{DateTime, Duration, Utc};
use coldtrace_common::types::{AlertCondition, AlertType, Severity, UnitTelemetry};

/// Missed check-in. Independent of connectivity: a unit can be online yet
/// fail its periodic check-in.
pub struct MissedCheckinCheck;

impl ConditionCheck for MissedCheckinCheck {
    fn alert_type(&self) -> AlertType {
        AlertType::MissedCheckin
    }

    fn check(
        &self,
        telemetry: &UnitTelemetry,
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Option<AlertCondition> {
        let last_checkin = telemetry.last_checkin_at?;
        let window = Duration::minutes(rules.missed_checkin_minutes);
        if now - last_checkin <= window {
            return None;
        }

        Some(AlertCondition {
            alert_type: AlertType::MissedCheckin,
            severity: Severity::Warning,
            triggered_at: last_checkin + window,
        })
    }
}

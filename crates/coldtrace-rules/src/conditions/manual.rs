use super::ConditionCheck;
use crate::AlertRuleConfig;
use chrono::{DateTime, Duration, Utc};
use coldtrace_common::types::{AlertCondition, AlertType, Severity, UnitTelemetry};

/// Human-initiated trigger. Decays automatically once the configured
/// window has passed; there is no explicit clear action.
pub struct ManualTriggerCheck;

impl ConditionCheck for ManualTriggerCheck {
    fn alert_type(&self) -> AlertType {
        AlertType::Manual
    }

    fn check(
        &self,
        telemetry: &UnitTelemetry,
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Option<AlertCondition> {
        let triggered_at = telemetry.manual_trigger_at?;
        if now - triggered_at > Duration::minutes(rules.manual_trigger_minutes) {
            return None;
        }

        Some(AlertCondition {
            alert_type: AlertType::Manual,
            severity: Severity::Warning,
            triggered_at,
        })
    }
}

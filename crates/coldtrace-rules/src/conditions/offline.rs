use super::ConditionCheck;
use crate::AlertRuleConfig;
use chrono::{DateTime, Duration, Utc};
use coldtrace_common::types::{AlertCondition, AlertType, Severity, UnitTelemetry};

/// Connectivity check. A unit is offline once it has been silent for
/// longer than the configured debounce; the condition escalates to
/// critical when the silence exceeds `trigger * critical_multiplier`.
pub struct OfflineCheck;

impl ConditionCheck for OfflineCheck {
    fn alert_type(&self) -> AlertType {
        AlertType::Offline
    }

    fn check(
        &self,
        telemetry: &UnitTelemetry,
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Option<AlertCondition> {
        let last_seen = telemetry.last_seen_at?;
        let silent = now - last_seen;
        let trigger = Duration::milliseconds(rules.offline_trigger_ms);
        if silent <= trigger {
            return None;
        }

        let critical_after =
            Duration::milliseconds(rules.offline_trigger_ms * rules.offline_critical_multiplier as i64);
        let severity = if silent > critical_after {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some(AlertCondition {
            alert_type: AlertType::Offline,
            severity,
            triggered_at: last_seen + trigger,
        })
    }
}

use crate::conditions::{
    checkin::MissedCheckinCheck, manual::ManualTriggerCheck, offline::OfflineCheck,
    temperature::TemperatureCheck, ConditionCheck,
};
use crate::AlertRuleConfig;
use chrono::{DateTime, Utc};
use coldtrace_common::types::{AlertCondition, UnitTelemetry};

fn checks() -> [&'static dyn ConditionCheck; 4] {
    static TEMPERATURE: TemperatureCheck = TemperatureCheck;
    static OFFLINE: OfflineCheck = OfflineCheck;
    static CHECKIN: MissedCheckinCheck = MissedCheckinCheck;
    static MANUAL: ManualTriggerCheck = ManualTriggerCheck;
    [&TEMPERATURE, &OFFLINE, &CHECKIN, &MANUAL]
}

/// Evaluates every condition rule against one unit's telemetry snapshot.
///
/// Pure: no I/O, no clock reads. The caller supplies `now`, so tests can
/// pin time. Severity overrides from the resolved config are applied to
/// the computed conditions before returning.
pub fn evaluate(
    telemetry: &UnitTelemetry,
    rules: &AlertRuleConfig,
    now: DateTime<Utc>,
) -> Vec<AlertCondition> {
    let mut conditions = Vec::new();
    for check in checks() {
        if let Some(mut condition) = check.check(telemetry, rules, now) {
            if let Some(&severity) = rules.severity_overrides.get(&condition.alert_type) {
                condition.severity = severity;
            }
            conditions.push(condition);
        }
    }
    conditions
}

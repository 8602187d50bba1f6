//! One condition checker per alert type. Each checker is a pure function
//! of (telemetry, rules, now); severity overrides are applied afterwards
//! by the evaluator.

pub mod checkin;
pub mod manual;
pub mod offline;
pub mod temperature;

use crate::AlertRuleConfig;
use chrono::{DateTime, Utc};
use coldtrace_common::types::{AlertCondition, AlertType, UnitTelemetry};

/// A single alert-condition rule.
pub trait ConditionCheck: Send + Sync {
    /// The alert type this checker produces.
    fn alert_type(&self) -> AlertType;

    /// Returns the condition if it currently holds, `None` otherwise.
    fn check(
        &self,
        telemetry: &UnitTelemetry,
        rules: &AlertRuleConfig,
        now: DateTime<Utc>,
    ) -> Option<AlertCondition>;
}

use super::ConditionCheck;
use crate::AlertRuleConfig;
use chrono::{DateTime, Utc};
use coldtrace_common::types::{AlertCondition, AlertType, Reading, Severity, UnitTelemetry};

/// Temperature out-of-range check with anti-flutter.
///
/// A single mildly out-of-range reading raises nothing; the condition
/// holds only once `consecutive_breaches` readings in a row are out of
/// range, or immediately when the deviation crosses the critical margin.
pub struct TemperatureCheck;

fn deviation(value: f64, min: Option<f64>, max: Option<f64>) -> Option<f64> {
    if let Some(min) = min {
        if value < min {
            return Some(min - value);
        }
    }
    if let Some(max) = max {
        if value > max {
            return Some(value - max);
        }
    }
    None
}

fn trailing_breaches(readings: &[Reading], min: Option<f64>, max: Option<f64>) -> u32 {
    readings
        .iter()
        .rev()
        .take_while(|r| deviation(r.value, min, max).is_some())
        .count() as u32
}

impl ConditionCheck for TemperatureCheck {
    fn alert_type(&self) -> AlertType {
        AlertType::Temperature
    }

    fn check(
        &self,
        telemetry: &UnitTelemetry,
        rules: &AlertRuleConfig,
        _now: DateTime<Utc>,
    ) -> Option<AlertCondition> {
        // No configured range means the unit type is not temperature-checked.
        if rules.temp_range_min.is_none() && rules.temp_range_max.is_none() {
            return None;
        }

        let latest = telemetry.latest_reading()?;
        let dev = deviation(latest.value, rules.temp_range_min, rules.temp_range_max)?;

        if dev > rules.critical_deviation_margin {
            return Some(AlertCondition {
                alert_type: AlertType::Temperature,
                severity: Severity::Critical,
                triggered_at: latest.timestamp,
            });
        }

        let breaches = trailing_breaches(
            &telemetry.recent_readings,
            rules.temp_range_min,
            rules.temp_range_max,
        );
        if breaches < rules.consecutive_breaches {
            return None;
        }

        Some(AlertCondition {
            alert_type: AlertType::Temperature,
            severity: Severity::Warning,
            triggered_at: latest.timestamp,
        })
    }
}

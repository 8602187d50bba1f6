//! Rule configuration and pure alert evaluation.
//!
//! [`resolver::RuleResolver`] merges the three configuration layers
//! (organization defaults, site overrides, unit overrides) into a fully
//! populated [`AlertRuleConfig`]. [`evaluator::evaluate`] is a pure
//! function from a telemetry snapshot plus resolved rules to the set of
//! alert conditions that currently hold, so it is unit-testable against
//! fixed clocks and fixture telemetry.

pub mod conditions;
pub mod evaluator;
pub mod resolver;


use coldtrace_common::types::{AlertType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration layer scope, from broadest to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Organization,
    Site,
    Unit,
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeType::Organization => write!(f, "organization"),
            ScopeType::Site => write!(f, "site"),
            ScopeType::Unit => write!(f, "unit"),
        }
    }
}

impl std::str::FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(ScopeType::Organization),
            "site" => Ok(ScopeType::Site),
            "unit" => Ok(ScopeType::Unit),
            _ => Err(format!("unknown scope type: {s}")),
        }
    }
}

/// One configuration layer. Every field is optional: `None` means "unset,
/// inherit from the parent layer", never "zero". Layers are merged
/// field-by-field with the most specific set value winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAlertRuleConfig {
    pub offline_trigger_ms: Option<i64>,
    /// Offline duration beyond `offline_trigger_ms * multiplier` escalates
    /// the condition to critical.
    pub offline_critical_multiplier: Option<u32>,
    pub missed_checkin_minutes: Option<i64>,
    pub manual_trigger_minutes: Option<i64>,
    pub temp_range_min: Option<f64>,
    pub temp_range_max: Option<f64>,
    /// Deviation beyond the range edge that makes a temperature breach
    /// critical on a single reading.
    pub critical_deviation_margin: Option<f64>,
    /// Consecutive out-of-range readings required before a non-critical
    /// breach raises a condition (anti-flutter).
    pub consecutive_breaches: Option<u32>,
    pub reminder_interval_minutes: Option<i64>,
    pub max_escalation_level: Option<i32>,
    /// Per-type severity overrides; merged per key across layers.
    pub severity_overrides: Option<HashMap<AlertType, Severity>>,
}

/// Fully resolved rule configuration. No unset fields remain: anything the
/// layers left open falls back to the hard-coded system defaults, except
/// the temperature range, which stays optional (units without a configured
/// range are simply not temperature-checked).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub offline_trigger_ms: i64,
    pub offline_critical_multiplier: u32,
    pub missed_checkin_minutes: i64,
    pub manual_trigger_minutes: i64,
    pub temp_range_min: Option<f64>,
    pub temp_range_max: Option<f64>,
    pub critical_deviation_margin: f64,
    pub consecutive_breaches: u32,
    pub reminder_interval_minutes: i64,
    pub max_escalation_level: i32,
    pub severity_overrides: HashMap<AlertType, Severity>,
}

impl Default for AlertRuleConfig {
    fn default() -> Self {
        Self {
            offline_trigger_ms: 300_000,
            offline_critical_multiplier: 3,
            missed_checkin_minutes: 60,
            manual_trigger_minutes: 30,
            temp_range_min: None,
            temp_range_max: None,
            critical_deviation_margin: 5.0,
            consecutive_breaches: 2,
            reminder_interval_minutes: 15,
            max_escalation_level: 3,
            severity_overrides: HashMap::new(),
        }
    }
}

impl AlertRuleConfig {
    /// Applies one layer on top of this config. Set fields win; unset
    /// fields leave the current value in place.
    pub fn apply(&mut self, layer: &PartialAlertRuleConfig) {
        if let Some(v) = layer.offline_trigger_ms {
            self.offline_trigger_ms = v;
        }
        if let Some(v) = layer.offline_critical_multiplier {
            self.offline_critical_multiplier = v;
        }
        if let Some(v) = layer.missed_checkin_minutes {
            self.missed_checkin_minutes = v;
        }
        if let Some(v) = layer.manual_trigger_minutes {
            self.manual_trigger_minutes = v;
        }
        if let Some(v) = layer.temp_range_min {
            self.temp_range_min = Some(v);
        }
        if let Some(v) = layer.temp_range_max {
            self.temp_range_max = Some(v);
        }
        if let Some(v) = layer.critical_deviation_margin {
            self.critical_deviation_margin = v;
        }
        if let Some(v) = layer.consecutive_breaches {
            self.consecutive_breaches = v;
        }
        if let Some(v) = layer.reminder_interval_minutes {
            self.reminder_interval_minutes = v;
        }
        if let Some(v) = layer.max_escalation_level {
            self.max_escalation_level = v;
        }
        if let Some(ref overrides) = layer.severity_overrides {
            for (k, v) in overrides {
                self.severity_overrides.insert(*k, *v);
            }
        }
    }
}

/// Errors produced while resolving rule configuration.
///
/// A `ConfigNotFound` means the unit cannot be evaluated at all; callers
/// must log and skip the unit, never treat it as "no alert".
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The unit references a site/org that does not exist.
    #[error("Rules: no configuration scope found for unit '{0}'")]
    ConfigNotFound(String),

    /// The underlying config store failed.
    #[error("Rules: config source error: {0}")]
    Source(String),
}

/// Read-side of the rule-config store, implemented by the persistence
/// layer. Passed into the resolver explicitly so tests can substitute a
/// fixture source.
#[async_trait::async_trait]
pub trait RuleConfigSource: Send + Sync {
    /// Returns the (site, organization) scope for a unit, or `None` if the
    /// unit is unknown.
    async fn unit_scope(&self, unit_id: &str) -> Result<Option<UnitScope>, RuleError>;

    /// Returns the stored partial config for one scope, if any.
    async fn layer(
        &self,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> Result<Option<PartialAlertRuleConfig>, RuleError>;
}

/// Parent scopes of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitScope {
    pub site_id: String,
    pub organization_id: String,
}

use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use coldtrace_alert::AlertStateMachine;
use coldtrace_common::types::{TelemetryReport, UnitTelemetry};
use coldtrace_rules::resolver::RuleResolver;
use coldtrace_storage::FacilityStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Readings kept per unit. The anti-flutter check needs only the last few
/// consecutive readings; everything older is irrelevant to evaluation.
const MAX_RECENT_READINGS: usize = 32;

/// In-memory telemetry snapshots, one per reporting unit.
///
/// The ingestion boundary posts normalized deltas; the reconciliation loop
/// reads full snapshots. Nothing here is persisted: after a restart the
/// registry refills as units report again.
#[derive(Default)]
pub struct TelemetryRegistry {
    units: HashMap<String, UnitTelemetry>,
}

impl TelemetryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one report into the unit's snapshot. Absent fields leave the
    /// current values untouched.
    pub fn apply(&mut self, unit_id: &str, report: &TelemetryReport) {
        let entry = self.units.entry(unit_id.to_string()).or_default();
        if let Some(reading) = report.reading {
            entry.recent_readings.push(reading);
            if entry.recent_readings.len() > MAX_RECENT_READINGS {
                let drop = entry.recent_readings.len() - MAX_RECENT_READINGS;
                entry.recent_readings.drain(..drop);
            }
        }
        if let Some(t) = report.checkin_at {
            entry.last_checkin_at = Some(t);
        }
        if let Some(t) = report.seen_at {
            entry.last_seen_at = Some(t);
        }
        if let Some(t) = report.manual_trigger_at {
            entry.manual_trigger_at = Some(t);
        }
    }

    pub fn get(&self, unit_id: &str) -> Option<UnitTelemetry> {
        self.units.get(unit_id).cloned()
    }

    /// Snapshot of every known unit, cloned out so evaluation runs without
    /// holding the registry lock.
    pub fn snapshot(&self) -> Vec<(String, UnitTelemetry)> {
        self.units
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FacilityStore>,
    pub machine: Arc<AlertStateMachine>,
    pub resolver: Arc<RuleResolver>,
    pub telemetry: Arc<Mutex<TelemetryRegistry>>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

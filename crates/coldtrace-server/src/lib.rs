//! HTTP surface and background schedulers for the alerting engine.
//!
//! Wires the storage, rules, alert, and notify crates together: the REST
//! API (alert lifecycle, telemetry ingestion, rule-config and contact
//! management), the per-unit reconciliation loop, the delivery worker
//! pool, the escalation ticks, and the daily digest timer.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod reconcile;
pub mod state;

//! Shared domain types for the coldtrace alerting engine.
//!
//! Everything here is plain data: enums for alert/job lifecycle states,
//! the persistent [`types::Alert`] record, the transient
//! [`types::UnitTelemetry`] snapshot consumed by the evaluator, and the
//! queue/audit records used by the delivery pipeline.

pub mod id;
pub mod types;

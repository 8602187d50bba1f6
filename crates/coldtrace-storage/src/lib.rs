//! Persistence layer for the facility alerting engine.
//!
//! One SQLite database (WAL mode) accessed through the [`FacilityStore`]
//! façade: monitored units and their rule-config layers, alert records,
//! escalation contacts and reminders, the durable notification-job queue,
//! and the append-only delivery audit log. Migrations run on connect.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use store::{AlertFilter, ContactInput, FacilityStore, UnitRow};

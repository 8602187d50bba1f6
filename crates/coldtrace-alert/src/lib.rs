//! Alert lifecycle state machine.
//!
//! Sits between the pure evaluator (which only reports which conditions
//! hold) and persistence: [`machine::AlertStateMachine::reconcile`]
//! converts condition snapshots into open/upgrade/auto-resolve
//! transitions, and the operator-facing `acknowledge`/`resolve` enforce
//! the lifecycle rules (`resolved` is terminal, severity never
//! downgrades, at most one open alert per unit and type).

pub mod error;
pub mod machine;

#[cfg(test)]
mod tests;

pub use error::AlertError;
pub use machine::AlertStateMachine;

pub mod alert;
pub mod delivery_log;
pub mod escalation_contact;
pub mod escalation_reminder;
pub mod notification_job;
pub mod rule_config;
pub mod unit;

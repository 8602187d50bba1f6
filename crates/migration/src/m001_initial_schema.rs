use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS units (
    id TEXT PRIMARY KEY NOT NULL,
    site_id TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_units_site ON units(site_id);
CREATE INDEX IF NOT EXISTS idx_units_organization ON units(organization_id);

CREATE TABLE IF NOT EXISTS rule_configs (
    id TEXT PRIMARY KEY NOT NULL,
    scope_type TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    offline_trigger_ms INTEGER,
    offline_critical_multiplier INTEGER,
    missed_checkin_minutes INTEGER,
    manual_trigger_minutes INTEGER,
    temp_range_min REAL,
    temp_range_max REAL,
    critical_deviation_margin REAL,
    consecutive_breaches INTEGER,
    reminder_interval_minutes INTEGER,
    max_escalation_level INTEGER,
    severity_overrides_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(scope_type, scope_id)
);

CREATE TABLE IF NOT EXISTS escalation_contacts (
    id TEXT PRIMARY KEY NOT NULL,
    unit_id TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    channel TEXT NOT NULL,
    address TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contacts_unit_level ON escalation_contacts(unit_id, level);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY NOT NULL,
    unit_id TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    acknowledged_at TEXT,
    acknowledged_by TEXT,
    notes TEXT,
    resolved_at TEXT,
    resolution TEXT,
    corrective_action TEXT,
    last_escalation_level INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_unit_type_status ON alerts(unit_id, alert_type, status);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_organization ON alerts(organization_id);
CREATE INDEX IF NOT EXISTS idx_alerts_opened_at ON alerts(opened_at DESC);

CREATE TABLE IF NOT EXISTS notification_jobs (
    id TEXT PRIMARY KEY NOT NULL,
    alert_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    recipient TEXT NOT NULL,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 5,
    scheduled_at TEXT NOT NULL,
    status TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status_scheduled ON notification_jobs(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_jobs_alert ON notification_jobs(alert_id);
CREATE INDEX IF NOT EXISTS idx_jobs_recipient_type ON notification_jobs(recipient, alert_type, created_at);

CREATE TABLE IF NOT EXISTS delivery_logs (
    id TEXT PRIMARY KEY NOT NULL,
    job_id TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    provider_error_code TEXT,
    provider_message_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delivery_logs_job ON delivery_logs(job_id);

CREATE TABLE IF NOT EXISTS escalation_reminders (
    id TEXT PRIMARY KEY NOT NULL,
    alert_id TEXT NOT NULL,
    escalation_level INTEGER NOT NULL,
    due_at TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reminders_status_due ON escalation_reminders(status, due_at);
CREATE INDEX IF NOT EXISTS idx_reminders_alert ON escalation_reminders(alert_id);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS escalation_reminders;
DROP TABLE IF EXISTS delivery_logs;
DROP TABLE IF EXISTS notification_jobs;
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS escalation_contacts;
DROP TABLE IF EXISTS rule_configs;
DROP TABLE IF EXISTS units;
";

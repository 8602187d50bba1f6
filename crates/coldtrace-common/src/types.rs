use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use coldtrace_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert!(Severity::Critical > Severity::Warning);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The kind of condition an alert tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Temperature,
    Offline,
    MissedCheckin,
    Manual,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::Temperature,
        AlertType::Offline,
        AlertType::MissedCheckin,
        AlertType::Manual,
    ];
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Temperature => write!(f, "temperature"),
            AlertType::Offline => write!(f, "offline"),
            AlertType::MissedCheckin => write!(f, "missed_checkin"),
            AlertType::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(AlertType::Temperature),
            "offline" => Ok(AlertType::Offline),
            "missed_checkin" => Ok(AlertType::MissedCheckin),
            "manual" => Ok(AlertType::Manual),
            _ => Err(format!("unknown alert type: {s}")),
        }
    }
}

/// Alert lifecycle state. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Notification delivery channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            _ => Err(format!("unknown channel: {s}")),
        }
    }
}

/// Queue state of a [`NotificationJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

/// Outcome of a single delivery attempt, recorded in the audit log.
///
/// `RateLimited` covers both intentional dispatcher suppression and
/// provider-side throttling; the two are distinguishable by whether a
/// provider error code is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    FatalError,
    RetryableError,
    RateLimited,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Sent => write!(f, "sent"),
            DeliveryOutcome::FatalError => write!(f, "fatal_error"),
            DeliveryOutcome::RetryableError => write!(f, "retryable_error"),
            DeliveryOutcome::RateLimited => write!(f, "rate_limited"),
        }
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryOutcome::Sent),
            "fatal_error" => Ok(DeliveryOutcome::FatalError),
            "retryable_error" => Ok(DeliveryOutcome::RetryableError),
            "rate_limited" => Ok(DeliveryOutcome::RateLimited),
            _ => Err(format!("unknown delivery outcome: {s}")),
        }
    }
}

/// A condition the evaluator found to hold for a unit right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
}

/// One normalized sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Transient telemetry snapshot for one unit, supplied by the ingestion
/// boundary. Not persisted by the alerting core.
///
/// `recent_readings` is ordered oldest-first; the last element is the
/// latest reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitTelemetry {
    pub recent_readings: Vec<Reading>,
    pub last_checkin_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub manual_trigger_at: Option<DateTime<Utc>>,
}

impl UnitTelemetry {
    pub fn latest_reading(&self) -> Option<&Reading> {
        self.recent_readings.last()
    }
}

/// Persistent alert record. At most one `active` alert exists per
/// (unit, alert type); the state machine enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Alert {
    pub id: String,
    pub unit_id: String,
    /// Denormalized for fast tenant scoping.
    pub organization_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub opened_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub corrective_action: Option<String>,
    /// Highest escalation tier that has been notified. Starts at 0.
    pub last_escalation_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queued unit of delivery work. The `id` is a deterministic idempotency
/// key, so re-enqueueing the same escalation step is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationJob {
    pub id: String,
    pub alert_id: String,
    /// Carried on the job so recipient rate limiting can scope by type.
    pub alert_type: AlertType,
    pub channel: Channel,
    pub recipient: String,
    /// Rendered message payload (JSON: subject + body).
    pub payload: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record for one delivery attempt. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeliveryLogEntry {
    pub id: String,
    pub job_id: String,
    pub attempt_number: i32,
    pub outcome: DeliveryOutcome,
    pub provider_error_code: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One entry in a unit's escalation-contact chain.
/// Level 0 is the first responder; higher levels reach the manager chain.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EscalationContact {
    pub id: String,
    pub unit_id: String,
    pub level: i32,
    pub channel: Channel,
    pub address: String,
}

/// Pending/handled state of a delayed escalation reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Done,
    Cancelled,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Done => write!(f, "done"),
            ReminderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "done" => Ok(ReminderStatus::Done),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            _ => Err(format!("unknown reminder status: {s}")),
        }
    }
}

/// Delayed check scheduled when an alert opens or escalates. If the alert
/// is still active when `due_at` passes, the next contact tier is notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationReminder {
    pub id: String,
    pub alert_id: String,
    pub escalation_level: i32,
    pub due_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---- API request types ----

/// Acknowledge an active alert.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AcknowledgeRequest {
    /// Identifier of the person acknowledging.
    pub acknowledged_by: String,
    /// Optional free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Resolve an active or acknowledged alert.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResolveRequest {
    /// Identifier of the person resolving.
    pub resolved_by: String,
    /// What resolved the condition (e.g. "compressor repaired").
    pub resolution: String,
    /// Optional corrective action taken.
    #[serde(default)]
    pub corrective_action: Option<String>,
}

/// Normalized telemetry report for one unit, posted by the ingestion
/// boundary. All fields are optional deltas; absent fields leave the
/// current snapshot untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TelemetryReport {
    /// Site the unit belongs to (upserts the unit record).
    pub site_id: String,
    /// Organization the unit belongs to (upserts the unit record).
    pub organization_id: String,
    #[serde(default)]
    pub reading: Option<Reading>,
    #[serde(default)]
    pub checkin_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual_trigger_at: Option<DateTime<Utc>>,
}

use sea_orm::entity::prelude::*;

/// One configuration layer. Every rule column is nullable; NULL means
/// "unset at this scope", never zero. (scope_type, scope_id) is unique.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rule_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub scope_type: String,
    pub scope_id: String,
    pub offline_trigger_ms: Option<i64>,
    pub offline_critical_multiplier: Option<i32>,
    pub missed_checkin_minutes: Option<i64>,
    pub manual_trigger_minutes: Option<i64>,
    pub temp_range_min: Option<f64>,
    pub temp_range_max: Option<f64>,
    pub critical_deviation_margin: Option<f64>,
    pub consecutive_breaches: Option<i32>,
    pub reminder_interval_minutes: Option<i64>,
    pub max_escalation_level: Option<i32>,
    pub severity_overrides_json: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;

/// Durable delivery queue row. The primary key is the deterministic
/// idempotency key, so a duplicate enqueue is a primary-key conflict.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "notification_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub alert_id: String,
    pub alert_type: String,
    pub channel: String,
    pub recipient: String,
    pub payload: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTimeWithTimeZone,
    pub status: String,
    pub last_error: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use anyhow::Result;
use chrono::{DateTime, Utc};
use coldtrace_common::types::{EscalationReminder, ReminderStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};

use crate::entities::escalation_reminder::{self, Column, Entity};
use crate::error;
use crate::store::FacilityStore;

fn to_reminder(m: escalation_reminder::Model) -> error::Result<EscalationReminder> {
    Ok(EscalationReminder {
        status: error::decode("status", &m.status)?,
        id: m.id,
        alert_id: m.alert_id,
        escalation_level: m.escalation_level,
        due_at: m.due_at.with_timezone(&Utc),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl FacilityStore {
    pub async fn insert_reminder(
        &self,
        alert_id: &str,
        escalation_level: i32,
        due_at: DateTime<Utc>,
    ) -> Result<EscalationReminder> {
        let now = Utc::now().fixed_offset();
        let am = escalation_reminder::ActiveModel {
            id: Set(coldtrace_common::id::next_id()),
            alert_id: Set(alert_id.to_owned()),
            escalation_level: Set(escalation_level),
            due_at: Set(due_at.fixed_offset()),
            status: Set(ReminderStatus::Pending.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_reminder(model)?)
    }

    /// Pending reminders whose due time has passed.
    pub async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EscalationReminder>> {
        let rows = Entity::find()
            .filter(Column::Status.eq(ReminderStatus::Pending.to_string()))
            .filter(Column::DueAt.lte(now.fixed_offset()))
            .order_by(Column::DueAt, Order::Asc)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_reminder(m).map_err(Into::into))
            .collect()
    }

    /// Conditional `pending → done`. Returns false if the reminder was
    /// already handled or cancelled.
    pub async fn mark_reminder_done(&self, id: &str) -> Result<bool> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(ReminderStatus::Done.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(ReminderStatus::Pending.to_string()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Best-effort cancellation of every pending reminder for one alert.
    /// The fire-time status re-check is what actually guarantees silence.
    pub async fn cancel_reminders_for_alert(&self, alert_id: &str) -> Result<u64> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(ReminderStatus::Cancelled.to_string()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::AlertId.eq(alert_id))
            .filter(Column::Status.eq(ReminderStatus::Pending.to_string()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}

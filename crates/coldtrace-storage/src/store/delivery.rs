use anyhow::Result;
use chrono::Utc;
use coldtrace_common::types::DeliveryLogEntry;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};

use crate::entities::delivery_log::{self, Column, Entity};
use crate::entities::notification_job;
use crate::error;
use crate::store::FacilityStore;

fn to_entry(m: delivery_log::Model) -> error::Result<DeliveryLogEntry> {
    Ok(DeliveryLogEntry {
        outcome: error::decode("outcome", &m.outcome)?,
        id: m.id,
        job_id: m.job_id,
        attempt_number: m.attempt_number,
        provider_error_code: m.provider_error_code,
        provider_message_id: m.provider_message_id,
        created_at: m.created_at.with_timezone(&Utc),
    })
}

impl FacilityStore {
    pub async fn insert_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<()> {
        let am = delivery_log::ActiveModel {
            id: Set(entry.id.clone()),
            job_id: Set(entry.job_id.clone()),
            attempt_number: Set(entry.attempt_number),
            outcome: Set(entry.outcome.to_string()),
            provider_error_code: Set(entry.provider_error_code.clone()),
            provider_message_id: Set(entry.provider_message_id.clone()),
            created_at: Set(Utc::now().fixed_offset()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn list_delivery_logs_by_job(&self, job_id: &str) -> Result<Vec<DeliveryLogEntry>> {
        let rows = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_entry(m).map_err(Into::into))
            .collect()
    }

    /// Full delivery history for one alert, across all of its jobs.
    pub async fn list_delivery_logs_by_alert(
        &self,
        alert_id: &str,
    ) -> Result<Vec<DeliveryLogEntry>> {
        let job_ids: Vec<String> = notification_job::Entity::find()
            .filter(notification_job::Column::AlertId.eq(alert_id))
            .all(self.db())
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = Entity::find()
            .filter(Column::JobId.is_in(job_ids))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_entry(m).map_err(Into::into))
            .collect()
    }
}

use anyhow::Result;
use chrono::Utc;
use coldtrace_common::types::{Channel, EscalationContact};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};

use crate::entities::escalation_contact::{self, Column, Entity};
use crate::error;
use crate::store::FacilityStore;

fn to_contact(m: escalation_contact::Model) -> error::Result<EscalationContact> {
    Ok(EscalationContact {
        channel: error::decode("channel", &m.channel)?,
        id: m.id,
        unit_id: m.unit_id,
        level: m.level,
        address: m.address,
    })
}

/// Contact as supplied by the API when replacing a unit's chain.
#[derive(Debug, Clone)]
pub struct ContactInput {
    pub level: i32,
    pub channel: Channel,
    pub address: String,
}

impl FacilityStore {
    /// Replaces the escalation chain for one unit.
    pub async fn set_unit_contacts(
        &self,
        unit_id: &str,
        contacts: &[ContactInput],
    ) -> Result<Vec<EscalationContact>> {
        Entity::delete_many()
            .filter(Column::UnitId.eq(unit_id))
            .exec(self.db())
            .await?;

        let now = Utc::now().fixed_offset();
        let mut results = Vec::with_capacity(contacts.len());
        for c in contacts {
            let id = coldtrace_common::id::next_id();
            let am = escalation_contact::ActiveModel {
                id: Set(id.clone()),
                unit_id: Set(unit_id.to_owned()),
                level: Set(c.level),
                channel: Set(c.channel.to_string()),
                address: Set(c.address.clone()),
                created_at: Set(now),
            };
            am.insert(self.db()).await?;
            results.push(EscalationContact {
                id,
                unit_id: unit_id.to_string(),
                level: c.level,
                channel: c.channel,
                address: c.address.clone(),
            });
        }
        Ok(results)
    }

    pub async fn list_unit_contacts(&self, unit_id: &str) -> Result<Vec<EscalationContact>> {
        let rows = Entity::find()
            .filter(Column::UnitId.eq(unit_id))
            .order_by(Column::Level, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_contact(m).map_err(Into::into))
            .collect()
    }

    /// Contacts at exactly one tier of a unit's chain. May be empty; the
    /// dispatcher logs and the escalation chain still advances.
    pub async fn list_contacts_at_level(
        &self,
        unit_id: &str,
        level: i32,
    ) -> Result<Vec<EscalationContact>> {
        let rows = Entity::find()
            .filter(Column::UnitId.eq(unit_id))
            .filter(Column::Level.eq(level))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_contact(m).map_err(Into::into))
            .collect()
    }
}

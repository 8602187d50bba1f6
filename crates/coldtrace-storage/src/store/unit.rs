use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::unit::{self, Column, Entity};
use crate::store::FacilityStore;

/// Monitored unit row (from the units table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRow {
    pub id: String,
    pub site_id: String,
    pub organization_id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_row(m: unit::Model) -> UnitRow {
    UnitRow {
        id: m.id,
        site_id: m.site_id,
        organization_id: m.organization_id,
        name: m.name,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl FacilityStore {
    /// Inserts the unit or refreshes its site/organization scope. Telemetry
    /// reports carry the scope on every call, so this runs on the hot path.
    pub async fn upsert_unit(
        &self,
        id: &str,
        site_id: &str,
        organization_id: &str,
        name: Option<&str>,
    ) -> Result<UnitRow> {
        let now = Utc::now().fixed_offset();
        let existing = Entity::find_by_id(id).one(self.db()).await?;
        let model = match existing {
            Some(m) => {
                let unchanged = m.site_id == site_id
                    && m.organization_id == organization_id
                    && (name.is_none() || m.name.as_deref() == name);
                if unchanged {
                    m
                } else {
                    let mut am: unit::ActiveModel = m.into();
                    am.site_id = Set(site_id.to_owned());
                    am.organization_id = Set(organization_id.to_owned());
                    if let Some(n) = name {
                        am.name = Set(Some(n.to_owned()));
                    }
                    am.updated_at = Set(now);
                    am.update(self.db()).await?
                }
            }
            None => {
                let am = unit::ActiveModel {
                    id: Set(id.to_owned()),
                    site_id: Set(site_id.to_owned()),
                    organization_id: Set(organization_id.to_owned()),
                    name: Set(name.map(str::to_owned)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                am.insert(self.db()).await?
            }
        };
        Ok(to_row(model))
    }

    pub async fn get_unit_by_id(&self, id: &str) -> Result<Option<UnitRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    /// Unit IDs in one site, used by the site filter on the alert list.
    pub async fn list_unit_ids_by_site(&self, site_id: &str) -> Result<Vec<String>> {
        let rows = Entity::find()
            .filter(Column::SiteId.eq(site_id))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(|m| m.id).collect())
    }
}

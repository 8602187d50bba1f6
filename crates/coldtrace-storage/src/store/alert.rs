use anyhow::Result;
use chrono::Utc;
use coldtrace_common::types::{Alert, AlertStatus, AlertType, Severity};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};

use crate::entities::alert::{self, Column, Entity};
use crate::error;
use crate::store::FacilityStore;

/// Alert list filter (`__eq` query params on the REST surface).
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status_eq: Option<AlertStatus>,
    pub unit_id_eq: Option<String>,
    pub organization_id_eq: Option<String>,
    /// Resolved to a unit-ID set before querying; alerts do not carry the
    /// site directly.
    pub site_id_eq: Option<String>,
}

fn to_alert(m: alert::Model) -> error::Result<Alert> {
    Ok(Alert {
        alert_type: error::decode("alert_type", &m.alert_type)?,
        severity: error::decode("severity", &m.severity)?,
        status: error::decode("status", &m.status)?,
        id: m.id,
        unit_id: m.unit_id,
        organization_id: m.organization_id,
        opened_at: m.opened_at.with_timezone(&Utc),
        acknowledged_at: m.acknowledged_at.map(|t| t.with_timezone(&Utc)),
        acknowledged_by: m.acknowledged_by,
        notes: m.notes,
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        resolution: m.resolution,
        corrective_action: m.corrective_action,
        last_escalation_level: m.last_escalation_level,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn open_statuses() -> [String; 2] {
    [
        AlertStatus::Active.to_string(),
        AlertStatus::Acknowledged.to_string(),
    ]
}

impl FacilityStore {
    pub async fn insert_alert(&self, a: &Alert) -> Result<Alert> {
        let now = Utc::now().fixed_offset();
        let am = alert::ActiveModel {
            id: Set(a.id.clone()),
            unit_id: Set(a.unit_id.clone()),
            organization_id: Set(a.organization_id.clone()),
            alert_type: Set(a.alert_type.to_string()),
            severity: Set(a.severity.to_string()),
            status: Set(a.status.to_string()),
            opened_at: Set(a.opened_at.fixed_offset()),
            acknowledged_at: Set(None),
            acknowledged_by: Set(None),
            notes: Set(None),
            resolved_at: Set(None),
            resolution: Set(None),
            corrective_action: Set(None),
            last_escalation_level: Set(a.last_escalation_level),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_alert(model)?)
    }

    pub async fn get_alert_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_alert).transpose()?)
    }

    /// The open (active or acknowledged) alert for one (unit, type), if any.
    /// The state machine guarantees at most one exists.
    pub async fn find_open_alert(
        &self,
        unit_id: &str,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        let model = Entity::find()
            .filter(Column::UnitId.eq(unit_id))
            .filter(Column::AlertType.eq(alert_type.to_string()))
            .filter(Column::Status.is_in(open_statuses()))
            .one(self.db())
            .await?;
        Ok(model.map(to_alert).transpose()?)
    }

    /// Conditional `active → acknowledged` transition. Returns the updated
    /// alert, or `None` if the alert was not in `active` when the update
    /// ran (lost-update safety: the status check is part of the UPDATE).
    pub async fn acknowledge_alert(
        &self,
        id: &str,
        acknowledged_by: &str,
        notes: Option<&str>,
    ) -> Result<Option<Alert>> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(AlertStatus::Acknowledged.to_string()))
            .col_expr(Column::AcknowledgedAt, Expr::value(now))
            .col_expr(Column::AcknowledgedBy, Expr::value(acknowledged_by))
            .col_expr(Column::Notes, Expr::value(notes.map(str::to_owned)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(AlertStatus::Active.to_string()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }
        self.get_alert_by_id(id).await
    }

    /// Conditional `{active, acknowledged} → resolved` transition. Returns
    /// the updated alert, or `None` if the alert was already resolved (or
    /// missing).
    pub async fn resolve_alert(
        &self,
        id: &str,
        resolution: &str,
        corrective_action: Option<&str>,
    ) -> Result<Option<Alert>> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(AlertStatus::Resolved.to_string()))
            .col_expr(Column::ResolvedAt, Expr::value(now))
            .col_expr(Column::Resolution, Expr::value(resolution))
            .col_expr(Column::CorrectiveAction, Expr::value(corrective_action.map(str::to_owned)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(open_statuses()))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }
        self.get_alert_by_id(id).await
    }

    /// Raises the stored severity of an open alert. Returns false if the
    /// alert resolved in the meantime.
    pub async fn upgrade_alert_severity(&self, id: &str, severity: Severity) -> Result<bool> {
        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Severity, Expr::value(severity.to_string()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(open_statuses()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Records the highest contact tier notified so far.
    pub async fn set_alert_escalation_level(&self, id: &str, level: i32) -> Result<()> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::LastEscalationLevel, Expr::value(level))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>> {
        let q = self.alert_query(filter).await?;
        let rows = q
            .order_by(Column::OpenedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_alert(m).map_err(Into::into))
            .collect()
    }

    pub async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        let q = self.alert_query(filter).await?;
        Ok(q.count(self.db()).await?)
    }

    /// All open alerts, used by the daily digest.
    pub async fn list_open_alerts(&self) -> Result<Vec<Alert>> {
        let rows = Entity::find()
            .filter(Column::Status.is_in(open_statuses()))
            .order_by(Column::OpenedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| to_alert(m).map_err(Into::into))
            .collect()
    }

    async fn alert_query(&self, filter: &AlertFilter) -> Result<sea_orm::Select<Entity>> {
        let mut q = Entity::find();
        if let Some(status) = filter.status_eq {
            q = q.filter(Column::Status.eq(status.to_string()));
        }
        if let Some(ref unit_id) = filter.unit_id_eq {
            q = q.filter(Column::UnitId.eq(unit_id.as_str()));
        }
        if let Some(ref org_id) = filter.organization_id_eq {
            q = q.filter(Column::OrganizationId.eq(org_id.as_str()));
        }
        if let Some(ref site_id) = filter.site_id_eq {
            let unit_ids = self.list_unit_ids_by_site(site_id).await?;
            q = q.filter(Column::UnitId.is_in(unit_ids));
        }
        Ok(q)
    }
}

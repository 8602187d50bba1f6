use anyhow::Result;
use chrono::Utc;
use coldtrace_common::types::{AlertType, Severity};
use coldtrace_rules::{PartialAlertRuleConfig, RuleConfigSource, RuleError, ScopeType, UnitScope};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;

use crate::entities::rule_config::{self, Column, Entity};
use crate::error;
use crate::store::FacilityStore;

fn to_partial(m: rule_config::Model) -> error::Result<PartialAlertRuleConfig> {
    let severity_overrides = match m.severity_overrides_json {
        Some(ref json) => {
            let raw: HashMap<String, String> = serde_json::from_str(json)?;
            let mut parsed: HashMap<AlertType, Severity> = HashMap::with_capacity(raw.len());
            for (k, v) in raw {
                parsed.insert(
                    error::decode("severity_overrides_json", &k)?,
                    error::decode("severity_overrides_json", &v)?,
                );
            }
            Some(parsed)
        }
        None => None,
    };
    Ok(PartialAlertRuleConfig {
        offline_trigger_ms: m.offline_trigger_ms,
        offline_critical_multiplier: m.offline_critical_multiplier.map(|v| v as u32),
        missed_checkin_minutes: m.missed_checkin_minutes,
        manual_trigger_minutes: m.manual_trigger_minutes,
        temp_range_min: m.temp_range_min,
        temp_range_max: m.temp_range_max,
        critical_deviation_margin: m.critical_deviation_margin,
        consecutive_breaches: m.consecutive_breaches.map(|v| v as u32),
        reminder_interval_minutes: m.reminder_interval_minutes,
        max_escalation_level: m.max_escalation_level,
        severity_overrides,
    })
}

fn overrides_json(
    overrides: &Option<HashMap<AlertType, Severity>>,
) -> error::Result<Option<String>> {
    match overrides {
        Some(map) => {
            let raw: HashMap<String, String> = map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Ok(Some(serde_json::to_string(&raw)?))
        }
        None => Ok(None),
    }
}

impl FacilityStore {
    /// Writes (or replaces) one configuration layer. Callers must invalidate
    /// the resolver cache for the affected units afterwards.
    pub async fn upsert_rule_config(
        &self,
        scope_type: ScopeType,
        scope_id: &str,
        layer: &PartialAlertRuleConfig,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let json = overrides_json(&layer.severity_overrides)?;
        let existing = Entity::find()
            .filter(Column::ScopeType.eq(scope_type.to_string()))
            .filter(Column::ScopeId.eq(scope_id))
            .one(self.db())
            .await?;

        let mut am = match existing {
            Some(m) => {
                let mut am: rule_config::ActiveModel = m.into();
                am.updated_at = Set(now);
                am
            }
            None => rule_config::ActiveModel {
                id: Set(coldtrace_common::id::next_id()),
                scope_type: Set(scope_type.to_string()),
                scope_id: Set(scope_id.to_owned()),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            },
        };
        am.offline_trigger_ms = Set(layer.offline_trigger_ms);
        am.offline_critical_multiplier = Set(layer.offline_critical_multiplier.map(|v| v as i32));
        am.missed_checkin_minutes = Set(layer.missed_checkin_minutes);
        am.manual_trigger_minutes = Set(layer.manual_trigger_minutes);
        am.temp_range_min = Set(layer.temp_range_min);
        am.temp_range_max = Set(layer.temp_range_max);
        am.critical_deviation_margin = Set(layer.critical_deviation_margin);
        am.consecutive_breaches = Set(layer.consecutive_breaches.map(|v| v as i32));
        am.reminder_interval_minutes = Set(layer.reminder_interval_minutes);
        am.max_escalation_level = Set(layer.max_escalation_level);
        am.severity_overrides_json = Set(json);
        am.save(self.db()).await?;
        Ok(())
    }

    pub async fn get_rule_config(
        &self,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> Result<Option<PartialAlertRuleConfig>> {
        let model = Entity::find()
            .filter(Column::ScopeType.eq(scope_type.to_string()))
            .filter(Column::ScopeId.eq(scope_id))
            .one(self.db())
            .await?;
        Ok(model.map(to_partial).transpose()?)
    }
}

#[async_trait::async_trait]
impl RuleConfigSource for FacilityStore {
    async fn unit_scope(&self, unit_id: &str) -> std::result::Result<Option<UnitScope>, RuleError> {
        let unit = self
            .get_unit_by_id(unit_id)
            .await
            .map_err(|e| RuleError::Source(e.to_string()))?;
        Ok(unit.map(|u| UnitScope {
            site_id: u.site_id,
            organization_id: u.organization_id,
        }))
    }

    async fn layer(
        &self,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> std::result::Result<Option<PartialAlertRuleConfig>, RuleError> {
        self.get_rule_config(scope_type, scope_id)
            .await
            .map_err(|e| RuleError::Source(e.to_string()))
    }
}

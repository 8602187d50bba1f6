use crate::{AlertRuleConfig, RuleConfigSource, RuleError, ScopeType, UnitScope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct CachedConfig {
    resolved_at: Instant,
    config: AlertRuleConfig,
}

/// Resolves the effective rule configuration for a unit by merging the
/// organization, site, and unit layers on top of the system defaults.
///
/// Results are cached for a short TTL per unit; any rule-config write must
/// call [`RuleResolver::invalidate`] (or `invalidate_all`) so the next
/// evaluation sees fresh values.
pub struct RuleResolver {
    source: Arc<dyn RuleConfigSource>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedConfig>>,
}

impl RuleResolver {
    pub fn new(source: Arc<dyn RuleConfigSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the effective configuration for `unit_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ConfigNotFound`] if the unit is unknown; the
    /// caller must skip evaluation for that unit.
    pub async fn resolve(&self, unit_id: &str) -> Result<AlertRuleConfig, RuleError> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(unit_id) {
                if entry.resolved_at.elapsed() < self.ttl {
                    return Ok(entry.config.clone());
                }
            }
        }

        let scope = self
            .source
            .unit_scope(unit_id)
            .await?
            .ok_or_else(|| RuleError::ConfigNotFound(unit_id.to_string()))?;

        let config = self.merge_layers(unit_id, &scope).await?;

        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            unit_id.to_string(),
            CachedConfig {
                resolved_at: Instant::now(),
                config: config.clone(),
            },
        );
        Ok(config)
    }

    /// Drops the cached config for one unit.
    pub fn invalidate(&self, unit_id: &str) {
        self.cache.lock().unwrap().remove(unit_id);
    }

    /// Drops every cached config. Called after site/org level writes where
    /// the affected unit set is unknown.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }

    async fn merge_layers(
        &self,
        unit_id: &str,
        scope: &UnitScope,
    ) -> Result<AlertRuleConfig, RuleError> {
        let mut config = AlertRuleConfig::default();

        // Broadest first so the most specific layer wins per field.
        let layers = [
            (ScopeType::Organization, scope.organization_id.as_str()),
            (ScopeType::Site, scope.site_id.as_str()),
            (ScopeType::Unit, unit_id),
        ];
        for (scope_type, scope_id) in layers {
            if let Some(partial) = self.source.layer(scope_type, scope_id).await? {
                config.apply(&partial);
            }
        }
        Ok(config)
    }
}

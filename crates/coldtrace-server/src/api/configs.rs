use crate::api::{error_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coldtrace_common::types::{AlertType, Channel, EscalationContact, Severity};
use coldtrace_rules::{PartialAlertRuleConfig, ScopeType};
use coldtrace_storage::ContactInput;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// One rule-configuration layer. Absent fields inherit from the parent
/// layer (or the system defaults); they never mean "zero".
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RuleConfigBody {
    #[serde(default)]
    pub offline_trigger_ms: Option<i64>,
    #[serde(default)]
    pub offline_critical_multiplier: Option<u32>,
    #[serde(default)]
    pub missed_checkin_minutes: Option<i64>,
    #[serde(default)]
    pub manual_trigger_minutes: Option<i64>,
    #[serde(default)]
    pub temp_range_min: Option<f64>,
    #[serde(default)]
    pub temp_range_max: Option<f64>,
    #[serde(default)]
    pub critical_deviation_margin: Option<f64>,
    #[serde(default)]
    pub consecutive_breaches: Option<u32>,
    #[serde(default)]
    pub reminder_interval_minutes: Option<i64>,
    #[serde(default)]
    pub max_escalation_level: Option<i32>,
    #[serde(default)]
    pub severity_overrides: Option<HashMap<AlertType, Severity>>,
}

impl From<RuleConfigBody> for PartialAlertRuleConfig {
    fn from(b: RuleConfigBody) -> Self {
        Self {
            offline_trigger_ms: b.offline_trigger_ms,
            offline_critical_multiplier: b.offline_critical_multiplier,
            missed_checkin_minutes: b.missed_checkin_minutes,
            manual_trigger_minutes: b.manual_trigger_minutes,
            temp_range_min: b.temp_range_min,
            temp_range_max: b.temp_range_max,
            critical_deviation_margin: b.critical_deviation_margin,
            consecutive_breaches: b.consecutive_breaches,
            reminder_interval_minutes: b.reminder_interval_minutes,
            max_escalation_level: b.max_escalation_level,
            severity_overrides: b.severity_overrides,
        }
    }
}

impl From<PartialAlertRuleConfig> for RuleConfigBody {
    fn from(p: PartialAlertRuleConfig) -> Self {
        Self {
            offline_trigger_ms: p.offline_trigger_ms,
            offline_critical_multiplier: p.offline_critical_multiplier,
            missed_checkin_minutes: p.missed_checkin_minutes,
            manual_trigger_minutes: p.manual_trigger_minutes,
            temp_range_min: p.temp_range_min,
            temp_range_max: p.temp_range_max,
            critical_deviation_margin: p.critical_deviation_margin,
            consecutive_breaches: p.consecutive_breaches,
            reminder_interval_minutes: p.reminder_interval_minutes,
            max_escalation_level: p.max_escalation_level,
            severity_overrides: p.severity_overrides,
        }
    }
}

/// Replace one configuration layer (organization, site, or unit scope).
#[utoipa::path(
    put,
    path = "/v1/rule-configs/{scope_type}/{scope_id}",
    tag = "RuleConfigs",
    params(
        ("scope_type" = String, Path, description = "organization / site / unit"),
        ("scope_id" = String, Path, description = "Scope ID")
    ),
    request_body = RuleConfigBody,
    responses(
        (status = 200, description = "Layer stored", body = RuleConfigBody),
        (status = 400, description = "Unknown scope type", body = ApiError)
    )
)]
async fn put_rule_config(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((scope_type, scope_id)): Path<(String, String)>,
    Json(body): Json<RuleConfigBody>,
) -> impl IntoResponse {
    let scope = match scope_type.parse::<ScopeType>() {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_scope", &e);
        }
    };
    let layer: PartialAlertRuleConfig = body.clone().into();
    if let Err(e) = state.store.upsert_rule_config(scope, &scope_id, &layer).await {
        tracing::error!(scope = %scope, scope_id = %scope_id, error = %e, "Failed to store rule config");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "storage_error",
            "Database error",
        );
    }

    // A site/org write can affect units we cannot enumerate cheaply.
    match scope {
        ScopeType::Unit => state.resolver.invalidate(&scope_id),
        _ => state.resolver.invalidate_all(),
    }
    tracing::info!(scope = %scope, scope_id = %scope_id, "rule config layer updated");
    success_response(StatusCode::OK, &trace_id, body)
}

/// Fetch one stored configuration layer (not the merged effective config).
#[utoipa::path(
    get,
    path = "/v1/rule-configs/{scope_type}/{scope_id}",
    tag = "RuleConfigs",
    params(
        ("scope_type" = String, Path, description = "organization / site / unit"),
        ("scope_id" = String, Path, description = "Scope ID")
    ),
    responses(
        (status = 200, description = "Stored layer", body = RuleConfigBody),
        (status = 400, description = "Unknown scope type", body = ApiError),
        (status = 404, description = "No layer stored for this scope", body = ApiError)
    )
)]
async fn get_rule_config(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((scope_type, scope_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let scope = match scope_type.parse::<ScopeType>() {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "invalid_scope", &e);
        }
    };
    match state.store.get_rule_config(scope, &scope_id).await {
        Ok(Some(layer)) => success_response(StatusCode::OK, &trace_id, RuleConfigBody::from(layer)),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("No rule config stored for {scope} '{scope_id}'"),
        ),
        Err(e) => {
            tracing::error!(scope = %scope, scope_id = %scope_id, error = %e, "Failed to query rule config");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// One contact in a unit's escalation chain.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContactBody {
    /// Tier, 0 = first responder.
    pub level: i32,
    pub channel: Channel,
    pub address: String,
}

/// Replace the escalation-contact chain for a unit.
#[utoipa::path(
    put,
    path = "/v1/units/{unit_id}/contacts",
    tag = "Contacts",
    params(
        ("unit_id" = String, Path, description = "Unit ID")
    ),
    request_body = Vec<ContactBody>,
    responses(
        (status = 200, description = "Stored chain", body = Vec<EscalationContact>),
        (status = 404, description = "Unit not found", body = ApiError)
    )
)]
async fn put_unit_contacts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Json(body): Json<Vec<ContactBody>>,
) -> impl IntoResponse {
    match state.store.get_unit_by_id(&unit_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("Unit '{unit_id}' not found"),
            );
        }
        Err(e) => {
            tracing::error!(unit_id = %unit_id, error = %e, "Failed to query unit");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    }

    let contacts: Vec<ContactInput> = body
        .into_iter()
        .map(|c| ContactInput {
            level: c.level,
            channel: c.channel,
            address: c.address,
        })
        .collect();
    match state.store.set_unit_contacts(&unit_id, &contacts).await {
        Ok(stored) => {
            tracing::info!(unit_id = %unit_id, contacts = stored.len(), "escalation chain replaced");
            success_response(StatusCode::OK, &trace_id, stored)
        }
        Err(e) => {
            tracing::error!(unit_id = %unit_id, error = %e, "Failed to store contacts");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// The escalation-contact chain for a unit, ordered by tier.
#[utoipa::path(
    get,
    path = "/v1/units/{unit_id}/contacts",
    tag = "Contacts",
    params(
        ("unit_id" = String, Path, description = "Unit ID")
    ),
    responses(
        (status = 200, description = "Contact chain", body = Vec<EscalationContact>)
    )
)]
async fn get_unit_contacts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_unit_contacts(&unit_id).await {
        Ok(contacts) => success_response(StatusCode::OK, &trace_id, contacts),
        Err(e) => {
            tracing::error!(unit_id = %unit_id, error = %e, "Failed to query contacts");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

pub fn config_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(put_rule_config, get_rule_config))
        .routes(routes!(put_unit_contacts, get_unit_contacts))
}

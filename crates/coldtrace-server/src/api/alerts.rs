use crate::api::pagination::{self, PaginationParams};
use crate::api::{error_response, success_paginated_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coldtrace_alert::AlertError;
use coldtrace_common::types::{
    AcknowledgeRequest, Alert, AlertStatus, DeliveryLogEntry, ResolveRequest,
};
use coldtrace_storage::AlertFilter;
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct AlertQueryParams {
    /// Status exact match (active / acknowledged / resolved)
    #[param(required = false)]
    #[serde(rename = "status__eq")]
    status_eq: Option<String>,
    /// Unit ID exact match
    #[param(required = false)]
    #[serde(rename = "unit_id__eq")]
    unit_id_eq: Option<String>,
    /// Site ID exact match
    #[param(required = false)]
    #[serde(rename = "site_id__eq")]
    site_id_eq: Option<String>,
    /// Organization ID exact match (tenant scoping)
    #[param(required = false)]
    #[serde(rename = "organization_id__eq")]
    organization_id_eq: Option<String>,
    /// Page size (default 20)
    #[param(required = false)]
    #[serde(default, deserialize_with = "pagination::deserialize_optional_u64")]
    limit: Option<u64>,
    /// Offset (default 0)
    #[param(required = false)]
    #[serde(default, deserialize_with = "pagination::deserialize_optional_u64")]
    offset: Option<u64>,
}

/// List alerts with `__eq` filters, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    params(AlertQueryParams),
    responses(
        (status = 200, description = "Paginated alert list", body = Vec<Alert>),
        (status = 400, description = "Invalid filter value", body = ApiError)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<AlertQueryParams>,
) -> impl IntoResponse {
    let status_eq = match params.status_eq.as_deref() {
        Some(raw) => match raw.parse::<AlertStatus>() {
            Ok(s) => Some(s),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e);
            }
        },
        None => None,
    };
    let filter = AlertFilter {
        status_eq,
        unit_id_eq: params.unit_id_eq,
        organization_id_eq: params.organization_id_eq,
        site_id_eq: params.site_id_eq,
    };
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let total = match state.store.count_alerts(&filter).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count alerts");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    };
    match state.store.list_alerts(&filter, limit, offset).await {
        Ok(items) => success_paginated_response(StatusCode::OK, &trace_id, items, total, limit, offset),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list alerts");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Alert detail.
#[utoipa::path(
    get,
    path = "/v1/alerts/{id}",
    tag = "Alerts",
    params(
        ("id" = String, Path, description = "Alert ID")
    ),
    responses(
        (status = 200, description = "Alert detail", body = Alert),
        (status = 404, description = "Alert not found", body = ApiError)
    )
)]
async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_alert_by_id(&id).await {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Alert '{id}' not found"),
        ),
        Err(e) => {
            tracing::error!(alert_id = %id, error = %e, "Failed to query alert");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

fn lifecycle_error(trace_id: &str, err: AlertError) -> Response {
    match err {
        AlertError::NotFound(ref id) => error_response(
            StatusCode::NOT_FOUND,
            trace_id,
            "not_found",
            &format!("Alert '{id}' not found"),
        ),
        AlertError::InvalidTransition { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        AlertError::Storage(e) => {
            tracing::error!(error = %e, "Alert transition failed on storage");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Acknowledge an active alert. Stops escalation.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/acknowledge",
    tag = "Alerts",
    params(
        ("id" = String, Path, description = "Alert ID")
    ),
    request_body = AcknowledgeRequest,
    responses(
        (status = 200, description = "Acknowledged alert", body = Alert),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Alert is not active", body = ApiError)
    )
)]
async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> impl IntoResponse {
    match state.machine.acknowledge(&id, &req).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => lifecycle_error(&trace_id, e),
    }
}

/// Resolve an active or acknowledged alert. Terminal.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/resolve",
    tag = "Alerts",
    params(
        ("id" = String, Path, description = "Alert ID")
    ),
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Resolved alert", body = Alert),
        (status = 404, description = "Alert not found", body = ApiError),
        (status = 409, description = "Alert already resolved", body = ApiError)
    )
)]
async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> impl IntoResponse {
    match state.machine.resolve(&id, &req).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => lifecycle_error(&trace_id, e),
    }
}

/// Delivery audit trail for one alert: every attempt of every notification
/// job, oldest first.
#[utoipa::path(
    get,
    path = "/v1/alerts/{id}/deliveries",
    tag = "Alerts",
    params(
        ("id" = String, Path, description = "Alert ID")
    ),
    responses(
        (status = 200, description = "Delivery log entries", body = Vec<DeliveryLogEntry>),
        (status = 404, description = "Alert not found", body = ApiError)
    )
)]
async fn alert_deliveries(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_alert_by_id(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("Alert '{id}' not found"),
            );
        }
        Err(e) => {
            tracing::error!(alert_id = %id, error = %e, "Failed to query alert");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            );
        }
    }
    match state.store.list_delivery_logs_by_alert(&id).await {
        Ok(entries) => success_response(StatusCode::OK, &trace_id, entries),
        Err(e) => {
            tracing::error!(alert_id = %id, error = %e, "Failed to query delivery logs");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts))
        .routes(routes!(get_alert))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
        .routes(routes!(alert_deliveries))
}

use crate::api::{error_response, success_empty_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use coldtrace_common::types::TelemetryReport;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Ingestion boundary: accepts one normalized telemetry report for a unit.
///
/// Upserts the unit's site/organization scope and merges the report into
/// the in-memory snapshot the reconciliation loop evaluates. Readings must
/// already be normalized; raw sensor wire formats are handled upstream.
#[utoipa::path(
    post,
    path = "/v1/telemetry/{unit_id}",
    tag = "Telemetry",
    params(
        ("unit_id" = String, Path, description = "Unit ID")
    ),
    request_body = TelemetryReport,
    responses(
        (status = 202, description = "Report accepted"),
        (status = 400, description = "Missing scope fields", body = ApiError)
    )
)]
async fn report_telemetry(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(unit_id): Path<String>,
    Json(report): Json<TelemetryReport>,
) -> impl IntoResponse {
    if report.site_id.is_empty() || report.organization_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "site_id and organization_id are required",
        );
    }

    if let Err(e) = state
        .store
        .upsert_unit(&unit_id, &report.site_id, &report.organization_id, None)
        .await
    {
        tracing::error!(unit_id = %unit_id, error = %e, "Failed to upsert unit");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "storage_error",
            "Database error",
        );
    }

    state
        .telemetry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .apply(&unit_id, &report);

    success_empty_response(StatusCode::ACCEPTED, &trace_id, "accepted")
}

pub fn telemetry_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(report_telemetry))
}

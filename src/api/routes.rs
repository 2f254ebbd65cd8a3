//! API route handlers

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{status_for_kind, AppState};
use crate::error::HealError;
use crate::heal::{HealState, HealingReport};

const DEFAULT_HISTORY_LIMIT: usize = 10;

/// POST /heal body
#[derive(Debug, Deserialize)]
pub struct HealRequest {
    #[serde(default, alias = "target_id")]
    pub service: String,
    #[serde(default)]
    pub alert_message: Option<String>,
}

/// POST /heal
///
/// 200 with the report for every terminal state except `ABORTED_ERROR`,
/// which carries the report with a 5xx status. The invocation runs as its
/// own task, so a client disconnect drops only the response.
pub async fn heal(
    State(state): State<AppState>,
    body: Result<Json<HealRequest>, JsonRejection>,
) -> Result<Response, HealError> {
    let Json(req) = body.map_err(|e| HealError::BadRequest(e.body_text()))?;

    let target_id = req.service.trim();
    if target_id.is_empty() {
        return Err(HealError::BadRequest("'service' is required".to_string()));
    }
    let target_id = target_id.to_string();
    let alert_message = req.alert_message.filter(|m| !m.trim().is_empty());

    let orchestrator = state.orchestrator.clone();
    let report = tokio::spawn(async move {
        orchestrator
            .heal(&target_id, alert_message.as_deref())
            .await
    })
    .await
    .map_err(|e| HealError::Internal(format!("healing task failed: {e}")))??;

    Ok((report_status(&report), Json(report)).into_response())
}

fn report_status(report: &HealingReport) -> StatusCode {
    match (report.final_state, &report.error) {
        (HealState::AbortedError, Some(err)) => status_for_kind(&err.kind),
        (HealState::AbortedError, None) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub incidents: Vec<HealingReport>,
}

/// GET /history
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let incidents = state.orchestrator.history().recent(limit).await;

    Json(HistoryResponse {
        count: incidents.len(),
        incidents,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub oracle_model: String,
    pub in_flight: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        oracle_model: state.orchestrator.oracle_id().to_string(),
        in_flight: state.orchestrator.in_flight_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heal::ReportError;
    use chrono::Utc;

    fn report(final_state: HealState, error: Option<&str>) -> HealingReport {
        HealingReport {
            invocation_id: "inv".to_string(),
            target_id: "a".to_string(),
            alert_message: None,
            started_at: Utc::now(),
            final_state,
            phases: Vec::new(),
            violations: Vec::new(),
            insufficient_data: false,
            assessment: None,
            remediations: Vec::new(),
            verification: None,
            error: error.map(|kind| ReportError {
                kind: kind.to_string(),
                message: String::new(),
            }),
            total_elapsed_ms: 0,
        }
    }

    #[test]
    fn test_report_status() {
        assert_eq!(report_status(&report(HealState::Resolved, None)), StatusCode::OK);
        assert_eq!(report_status(&report(HealState::Escalated, None)), StatusCode::OK);
        assert_eq!(
            report_status(&report(HealState::AbortedTimeout, Some("timeout"))),
            StatusCode::OK
        );
        assert_eq!(
            report_status(&report(HealState::AbortedError, Some("unavailable"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            report_status(&report(HealState::AbortedError, Some("remediation_rejected"))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_heal_request_accepts_target_id_alias() {
        let req: HealRequest = serde_json::from_str(r#"{"target_id": "user-api"}"#).unwrap();
        assert_eq!(req.service, "user-api");
        assert!(req.alert_message.is_none());
    }
}

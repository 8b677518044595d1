//! Admin endpoints over the pending report requests and the two passes.

use crate::error::ApiError;
use crate::models::{DataResponse, DispatchSummary, IngestSummary, MessageResponse, ReportRequest};
use crate::scheduler::ReportService;
use crate::store::ReportStore;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// List pending report requests, oldest first.
#[openapi(tag = "Reports")]
#[get("/reports")]
pub async fn list_reports(
    store: &State<Arc<dyn ReportStore>>,
) -> Result<Json<DataResponse<Vec<ReportRequest>>>, ApiError> {
    let requests = store.list_pending().await?;
    Ok(Json(DataResponse { data: requests }))
}

/// Get one report request.
#[openapi(tag = "Reports")]
#[get("/reports/<id>")]
pub async fn get_report(
    id: i64,
    store: &State<Arc<dyn ReportStore>>,
) -> Result<Json<ReportRequest>, ApiError> {
    store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Report request {} not found", id)))
}

/// Drop a report request without sending anything.
#[openapi(tag = "Reports")]
#[delete("/reports/<id>")]
pub async fn delete_report(
    id: i64,
    store: &State<Arc<dyn ReportStore>>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !store.delete(id).await? {
        return Err(ApiError::NotFound(format!("Report request {} not found", id)));
    }

    log::info!("report request {} deleted via admin API", id);
    Ok(Json(MessageResponse {
        message: format!("Report request {} deleted", id),
    }))
}

/// Run an ingestion pass now.
#[openapi(tag = "Reports")]
#[post("/reports/ingest")]
pub async fn trigger_ingest(
    service: &State<Arc<ReportService>>,
) -> Result<Json<IngestSummary>, ApiError> {
    service
        .try_ingest()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("Ingestion pass already running".to_string()))
}

/// Run a dispatch pass now.
#[openapi(tag = "Reports")]
#[post("/reports/dispatch")]
pub async fn trigger_dispatch(
    service: &State<Arc<ReportService>>,
    cancel: &State<CancellationToken>,
) -> Result<Json<DispatchSummary>, ApiError> {
    service
        .try_dispatch(cancel.inner())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::Conflict("Dispatch pass already running".to_string()))
}

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::models::AppState;
use crate::queue::Run;
use crate::types::AppResult;

#[derive(Serialize)]
struct RunsResponse {
    data: Vec<Run>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/events/{event_id}/runs", get(event_runs))
        .with_state(state)
}

async fn event_runs(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> AppResult<Json<RunsResponse>> {
    let runs = state.jobs.runs(&event_id).await?;
    Ok(Json(RunsResponse { data: runs }))
}

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::info;

use crate::models::{AppState, ImportRequest, ImportResponse, Strategy};
use crate::orchestrator::ImportSession;
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/imports", post(create_import))
        .with_state(state)
}

/// Run an upload through its strategy. Manual and inference imports answer
/// with the projected contacts; agentic imports answer 202 with the event
/// to poll.
async fn create_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> AppResult<(StatusCode, Json<ImportResponse>)> {
    info!(
        file_name = %request.file_name,
        strategy = ?request.strategy,
        bytes = request.csv.len(),
        "Import requested"
    );

    let mut session = ImportSession::new(request.strategy);
    session.set_ranking_criteria(request.ranking_criteria)?;
    session.select_file(&request.file_name, &request.csv)?;

    let response = match request.strategy {
        Strategy::Manual => {
            let mapping = request.mapping.ok_or_else(|| {
                AppError::InvalidRequest("mapping is required for manual imports".to_string())
            })?;
            let contacts = session.apply_mapping(&mapping)?.to_vec();
            (
                StatusCode::OK,
                ImportResponse {
                    step: session.step(),
                    mapping: None,
                    contacts: Some(contacts),
                    event_id: None,
                    run_ids: None,
                },
            )
        }
        Strategy::Inference => {
            let contacts = session.resolve_with_inference(&state.llm).await?.to_vec();
            (
                StatusCode::OK,
                ImportResponse {
                    step: session.step(),
                    mapping: Some(session.mapping().clone()),
                    contacts: Some(contacts),
                    event_id: None,
                    run_ids: None,
                },
            )
        }
        Strategy::Agentic => {
            let sent = session.submit_agentic(&state.jobs).await?;
            (
                StatusCode::ACCEPTED,
                ImportResponse {
                    step: session.step(),
                    mapping: None,
                    contacts: None,
                    event_id: Some(sent.event_id),
                    run_ids: Some(sent.run_ids),
                },
            )
        }
    };

    Ok((response.0, Json(response.1)))
}

use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use crate::models::{AppState, Contact, MergeResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/contacts", get(list_contacts).post(merge_contacts))
        .with_state(state)
}

async fn list_contacts(State(state): State<AppState>) -> Json<Vec<Contact>> {
    Json(state.contacts.list().await)
}

/// Append confirmed contacts to the contact book
async fn merge_contacts(
    State(state): State<AppState>,
    Json(contacts): Json<Vec<Contact>>,
) -> Json<MergeResponse> {
    let merged = contacts.len();
    info!(merged, "Merging confirmed contacts");
    let total = state.contacts.merge(contacts).await;
    Json(MergeResponse { merged, total })
}

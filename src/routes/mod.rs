//! API Routes
//!
//! This module organizes all HTTP endpoints for the application:
//! - `/api/health` - Health checks
//! - `/api/imports` - Upload a CSV file and resolve it with one strategy
//! - `/api/contacts` - Contact book (list and merge)
//! - `/v1/events/{event_id}/runs` - Status of agentic import runs

pub mod contacts;
pub mod events;
pub mod health;
pub mod imports;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(imports::router(state.clone()))
        .merge(contacts::router(state.clone()))
        .merge(events::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::testing::replying;
    use crate::sandbox::testing::ScriptedProvider;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const CSV: &str = "Name,Email Address,Company\nAda Lovelace,ada@x.com,Analytical Engines\nNo Email,,Nowhere";

    fn state_with(config: Config, llm_reply: &str, stdout: &str) -> AppState {
        let (llm, _) = replying(llm_reply);
        AppState::new(config, llm, Arc::new(ScriptedProvider::printing(stdout)))
    }

    fn state(llm_reply: &str) -> AppState {
        state_with(Config::default(), llm_reply, "[]")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(create_router(state("")), get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_manual_import() {
        let request = post_json(
            "/api/imports",
            json!({
                "fileName": "contacts.csv",
                "csv": CSV,
                "strategy": "manual",
                "mapping": {"fullName": "Name", "email": "Email Address", "company": "Company"}
            }),
        );
        let (status, body) = send(create_router(state("")), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "import");
        assert_eq!(
            body["contacts"],
            json!([{"fullName": "Ada Lovelace", "email": "ada@x.com", "company": "Analytical Engines"}])
        );
    }

    #[tokio::test]
    async fn test_manual_import_requires_identify_fields() {
        let request = post_json(
            "/api/imports",
            json!({"fileName": "contacts.csv", "csv": CSV, "strategy": "manual", "mapping": {"fullName": "Name"}}),
        );
        let (status, body) = send(create_router(state("")), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("identify"));
    }

    #[tokio::test]
    async fn test_rejects_non_csv_upload() {
        let request = post_json(
            "/api/imports",
            json!({"fileName": "contacts.pdf", "csv": CSV, "strategy": "manual", "mapping": {}}),
        );
        let (status, _) = send(create_router(state("")), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inference_import() {
        let reply = "```json\n{\"fullName\": \"Name\", \"email\": \"Email Address\"}\n```";
        let request = post_json(
            "/api/imports",
            json!({"fileName": "contacts.csv", "csv": CSV, "strategy": "inference"}),
        );
        let (status, body) = send(create_router(state(reply)), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mapping"], json!({"fullName": "Name", "email": "Email Address"}));
        assert_eq!(body["contacts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inference_without_mapping_is_unprocessable() {
        let request = post_json(
            "/api/imports",
            json!({"fileName": "contacts.csv", "csv": CSV, "strategy": "inference"}),
        );
        let (status, _) = send(create_router(state("no mapping here")), request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_agentic_import_and_status() {
        let program = "```javascript\nconsole.log(JSON.stringify([]))\n```";
        let state = state_with(
            Config::default(),
            program,
            r#"[{"fullName":"Ada Lovelace","email":"ada@x.com","ranking":7}]"#,
        );
        let app = create_router(state);

        let request = post_json(
            "/api/imports",
            json!({"fileName": "contacts.csv", "csv": CSV, "strategy": "agentic", "rankingCriteria": "seniority"}),
        );
        let (status, body) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["step"], "mapping");
        let event_id = body["eventId"].as_str().unwrap().to_string();
        assert_eq!(body["runIds"].as_array().unwrap().len(), 1);

        let uri = format!("/v1/events/{}/runs", event_id);
        let mut run = Value::Null;
        for _ in 0..200 {
            let (status, body) = send(app.clone(), get(&uri)).await;
            assert_eq!(status, StatusCode::OK);
            run = body["data"][0].clone();
            if run["status"] == "Completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(run["status"], "Completed");
        assert_eq!(run["output"][0]["ranking"], "7");
    }

    #[tokio::test]
    async fn test_unknown_event_is_not_found() {
        let (status, _) = send(create_router(state("")), get("/v1/events/missing/runs")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_contact_book_merge_and_list() {
        let app = create_router(state(""));
        let contacts = json!([
            {"fullName": "Ada Lovelace", "email": "ada@x.com"},
            {"fullName": "Grace Hopper", "email": "grace@navy.mil", "ranking": "9"}
        ]);

        let (status, body) = send(app.clone(), post_json("/api/contacts", contacts.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"merged": 2, "total": 2}));

        let (_, body) = send(app.clone(), post_json("/api/contacts", json!([contacts[0]]))).await;
        assert_eq!(body["total"], 3);

        let (_, body) = send(app, get("/api/contacts")).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[1]["ranking"], "9");
    }
}

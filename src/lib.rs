// Contact Import - CSV contacts mapped onto a fixed schema by hand, by one
// model call, or by generated code running in a sandbox

pub mod agents;
pub mod config;
pub mod llm;
pub mod mapper;
pub mod mapping;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod poll;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}

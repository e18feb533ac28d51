// HTTP sandbox service client.
//
// Endpoints (relative to the configured base URL):
//   POST   /sandboxes                  create, returns {"sandboxId": ...}
//   POST   /sandboxes/{id}/files       write {"path", "content"}
//   POST   /sandboxes/{id}/execute     run {"code", "language"}
//   DELETE /sandboxes/{id}             destroy

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sandbox::{Execution, ExecutionError, Sandbox, SandboxProvider};
use crate::types::{AppError, AppResult};

/// Where the dataset lives inside remote sandboxes
pub const REMOTE_DATA_PATH: &str = "/home/user/contacts.csv";

pub struct RemoteSandboxProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    template: &'static str,
    timeout_ms: u64,
    allow_internet_access: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    sandbox_id: String,
}

#[derive(Serialize)]
struct WriteFileRequest<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    language: &'static str,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    logs: ExecutionLogs,
    #[serde(default)]
    error: Option<ExecutionError>,
}

#[derive(Default, Deserialize)]
struct ExecutionLogs {
    #[serde(default)]
    stdout: Vec<String>,
    #[serde(default)]
    stderr: Vec<String>,
}

impl RemoteSandboxProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_ms: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_ms,
        }
    }
}

fn authorize(builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => builder.header("X-API-Key", key),
        None => builder,
    }
}

async fn check(response: Response, action: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Sandbox(format!("{} failed ({}): {}", action, status, body)))
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    fn data_path(&self) -> &str {
        REMOTE_DATA_PATH
    }

    async fn create(&self) -> AppResult<Arc<dyn Sandbox>> {
        let request = CreateRequest {
            template: "node",
            timeout_ms: self.timeout_ms,
            allow_internet_access: false,
        };

        let response = authorize(
            self.client.post(format!("{}/sandboxes", self.base_url)),
            self.api_key.as_deref(),
        )
        .json(&request)
        .send()
        .await?;
        let created: CreateResponse = check(response, "Sandbox create").await?.json().await?;

        info!(sandbox_id = %created.sandbox_id, "Remote sandbox created");

        Ok(Arc::new(RemoteSandbox {
            client: self.client.clone(),
            url: format!("{}/sandboxes/{}", self.base_url, created.sandbox_id),
            id: created.sandbox_id,
            api_key: self.api_key.clone(),
        }))
    }
}

pub struct RemoteSandbox {
    client: Client,
    id: String,
    url: String,
    api_key: Option<String>,
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &str) -> AppResult<()> {
        let response = authorize(
            self.client.post(format!("{}/files", self.url)),
            self.api_key.as_deref(),
        )
        .json(&WriteFileRequest { path, content: contents })
        .send()
        .await?;
        check(response, "Sandbox file write").await?;
        debug!(sandbox_id = %self.id, path = %path, bytes = contents.len(), "Wrote sandbox file");
        Ok(())
    }

    async fn run_code(&self, code: &str) -> AppResult<Execution> {
        let response = authorize(
            self.client.post(format!("{}/execute", self.url)),
            self.api_key.as_deref(),
        )
        .json(&ExecuteRequest { code, language: "js" })
        .send()
        .await?;
        let executed: ExecuteResponse = check(response, "Sandbox execute").await?.json().await?;

        Ok(Execution {
            stdout: executed.logs.stdout,
            stderr: executed.logs.stderr,
            error: executed.error,
        })
    }

    async fn kill(&self) -> AppResult<()> {
        let response = authorize(self.client.delete(&self.url), self.api_key.as_deref())
            .send()
            .await?;
        check(response, "Sandbox kill").await?;
        info!(sandbox_id = %self.id, "Remote sandbox killed");
        Ok(())
    }
}

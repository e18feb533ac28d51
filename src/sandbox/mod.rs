//! Sandbox Execution
//!
//! Generated transformation code runs in an ephemeral sandbox that is owned
//! by exactly one agent iteration. A sandbox is acquired at the start of the
//! iteration and destroyed at its end on every exit path.
//!
//! ```text
//!  acquire ──▶ write contacts.csv ──▶ run code ──▶ release (kill)
//!     │                                               ▲
//!     └────────────── error / panic / drop ───────────┘
//! ```
//!
//! Two providers are available:
//! - [`remote::RemoteSandboxProvider`]: HTTP sandbox service, networkless
//!   sandboxes created per request
//! - [`process::ProcessSandboxProvider`]: local interpreter process in a
//!   scratch directory, for development only (no network isolation)

pub mod process;
pub mod remote;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::types::{AppError, AppResult};

/// Output of one code execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Chunks written to standard output, in order
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default)]
    pub stderr: Vec<String>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
}

impl Execution {
    pub fn stdout_text(&self) -> String {
        self.stdout.concat()
    }
}

/// Error raised by the executed program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    async fn write_file(&self, path: &str, contents: &str) -> AppResult<()>;

    async fn run_code(&self, code: &str) -> AppResult<Execution>;

    /// Destroy the sandbox and everything in it
    async fn kill(&self) -> AppResult<()>;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Location the dataset is written to inside every sandbox
    fn data_path(&self) -> &str;

    async fn create(&self) -> AppResult<Arc<dyn Sandbox>>;
}

/// Build the provider named in configuration
pub fn provider_from_config(config: &SandboxConfig) -> AppResult<Arc<dyn SandboxProvider>> {
    match config.provider.as_str() {
        "remote" => Ok(Arc::new(remote::RemoteSandboxProvider::new(
            &config.url,
            config.api_key.clone(),
            config.timeout_ms,
        ))),
        "process" => Ok(Arc::new(process::ProcessSandboxProvider::new(
            &config.node_bin,
            config.timeout_ms,
        ))),
        other => Err(AppError::InvalidRequest(format!(
            "Unknown sandbox provider: {}",
            other
        ))),
    }
}

/// Exclusive ownership of one sandbox. [`SandboxLease::release`] kills it;
/// a lease dropped without release (panic, cancelled future) schedules the
/// kill on the current runtime instead.
pub struct SandboxLease {
    sandbox: Arc<dyn Sandbox>,
    released: bool,
}

impl SandboxLease {
    pub async fn acquire(provider: &dyn SandboxProvider) -> AppResult<Self> {
        let sandbox = provider.create().await?;
        debug!(sandbox_id = %sandbox.id(), "Sandbox acquired");
        Ok(Self {
            sandbox,
            released: false,
        })
    }

    pub fn handle(&self) -> Arc<dyn Sandbox> {
        Arc::clone(&self.sandbox)
    }

    pub async fn release(mut self) -> AppResult<()> {
        self.released = true;
        let result = self.sandbox.kill().await;
        debug!(sandbox_id = %self.sandbox.id(), ok = result.is_ok(), "Sandbox released");
        result
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let sandbox = Arc::clone(&self.sandbox);
        warn!(sandbox_id = %sandbox.id(), "Sandbox lease dropped without release, killing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sandbox.kill().await {
                        warn!(sandbox_id = %sandbox.id(), error = %e, "Background sandbox kill failed");
                    }
                });
            }
            Err(_) => {
                warn!(sandbox_id = %sandbox.id(), "No runtime available to kill sandbox");
            }
        }
    }
}

/// Run `f` against a fresh sandbox and destroy the sandbox afterwards,
/// whatever `f` returned. A failed kill is logged; the result of `f` wins.
pub async fn with_sandbox<T, F, Fut>(provider: &dyn SandboxProvider, f: F) -> AppResult<T>
where
    F: FnOnce(Arc<dyn Sandbox>) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let lease = SandboxLease::acquire(provider).await?;
    let result = f(lease.handle()).await;
    if let Err(e) = lease.release().await {
        warn!(error = %e, "Failed to kill sandbox");
    }
    result
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;

    #[tokio::test]
    async fn test_with_sandbox_releases_on_success() {
        let provider = ScriptedProvider::printing("[]");
        let out = with_sandbox(&provider, |sbx| async move {
            let execution = sbx.run_code("console.log('[]')").await?;
            Ok(execution.stdout_text())
        })
        .await
        .unwrap();

        assert_eq!(out, "[]");
        assert_eq!(provider.created(), 1);
        assert_eq!(provider.killed(), 1);
    }

    #[tokio::test]
    async fn test_with_sandbox_releases_on_error() {
        let provider = ScriptedProvider::printing("");
        let result: AppResult<()> = with_sandbox(&provider, |_sbx| async move {
            Err(AppError::Sandbox("boom".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(provider.killed(), 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_kills_in_background() {
        let provider = ScriptedProvider::printing("");
        {
            let _lease = SandboxLease::acquire(&provider).await.unwrap();
        }
        // Let the spawned kill run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.killed(), 1);
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = SandboxConfig::default();
        assert!(provider_from_config(&config).is_ok());
        config.provider = "process".to_string();
        assert!(provider_from_config(&config).is_ok());
        config.provider = "vm".to_string();
        assert!(provider_from_config(&config).is_err());
    }

    #[test]
    fn test_stdout_text_joins_chunks() {
        let execution = Execution {
            stdout: vec!["[{\"a\":".to_string(), "1}]\n".to_string()],
            ..Default::default()
        };
        assert_eq!(execution.stdout_text(), "[{\"a\":1}]\n");
    }
}

//! Run Status Polling
//!
//! Waits for the run started by an event to reach a terminal status. The
//! wait is bounded: delays grow exponentially up to a cap, the total wait is
//! limited, and a watch channel cancels it early.
//!
//! ```text
//!  ┌──────────┐  not terminal   ┌───────────────┐
//!  │  query   │ ──────────────▶ │ sleep backoff │ ──┐
//!  └──────────┘                 └───────────────┘   │
//!    ▲  │ Completed → Ok(run)         │ cancel      │
//!    │  │ Failed / Cancelled → Err    ▼             │
//!    │  │                        Err(Cancelled)     │
//!    └──┴────────────── max wait? → Err(PollTimeout) ◀┘
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PollSettings;
use crate::queue::{JobQueue, RunStatus};
use crate::types::{AppError, AppResult};
use crate::utils::Backoff;

/// Status and output of one run, as returned by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    data: Vec<RunInfo>,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Runs started by `event_id`, first run first
    async fn runs(&self, event_id: &str) -> AppResult<Vec<RunInfo>>;
}

/// Client for `GET {base}/v1/events/{id}/runs`
pub struct HttpStatusSource {
    client: Client,
    base_url: String,
    signing_key: Option<String>,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, signing_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_key,
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn runs(&self, event_id: &str) -> AppResult<Vec<RunInfo>> {
        let url = format!("{}/v1/events/{}/runs", self.base_url, event_id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.signing_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("event {}", event_id)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Status request failed ({}): {}",
                status, body
            )));
        }

        let runs: RunsResponse = response.json().await?;
        Ok(runs.data)
    }
}

#[async_trait]
impl StatusSource for JobQueue {
    async fn runs(&self, event_id: &str) -> AppResult<Vec<RunInfo>> {
        let runs = JobQueue::runs(self, event_id).await?;
        Ok(runs
            .into_iter()
            .map(|run| RunInfo {
                status: run.status,
                output: run.output,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub backoff: Backoff,
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            backoff: Backoff::new(settings.initial(), settings.max_interval()),
            max_wait: settings.max_wait(),
        }
    }
}

/// Poll until the event's first run is terminal.
///
/// Completed runs are returned; failed and remotely cancelled runs become
/// [`AppError::JobFailed`]. Exceeding `max_wait` gives
/// [`AppError::PollTimeout`] and a `true` on `cancel` gives
/// [`AppError::Cancelled`]. Transient query errors are logged and retried;
/// an unknown event fails immediately.
pub async fn poll_until_terminal(
    source: &dyn StatusSource,
    event_id: &str,
    config: &PollConfig,
    mut cancel: watch::Receiver<bool>,
) -> AppResult<RunInfo> {
    let started = Instant::now();
    let mut delays = config.backoff.iter();
    let mut cancel_open = true;

    info!(event_id = %event_id, max_wait_ms = config.max_wait.as_millis() as u64, "Polling run status");

    loop {
        if *cancel.borrow_and_update() {
            info!(event_id = %event_id, "Polling cancelled");
            return Err(AppError::Cancelled);
        }

        match source.runs(event_id).await {
            Ok(runs) => match runs.into_iter().next() {
                Some(run) if run.status.is_terminal() => {
                    info!(event_id = %event_id, status = %run.status, "Run finished");
                    return match run.status {
                        RunStatus::Completed => Ok(run),
                        status => Err(AppError::JobFailed(
                            event_id.to_string(),
                            failure_reason(status, run.output.as_ref()),
                        )),
                    };
                }
                Some(run) => debug!(event_id = %event_id, status = %run.status, "Run not finished"),
                None => debug!(event_id = %event_id, "No run started yet"),
            },
            Err(AppError::NotFound(what)) => return Err(AppError::NotFound(what)),
            Err(e) => warn!(event_id = %event_id, error = %e, "Status query failed, retrying"),
        }

        let elapsed = started.elapsed();
        if elapsed >= config.max_wait {
            warn!(event_id = %event_id, "Gave up waiting for run");
            return Err(AppError::PollTimeout(config.max_wait.as_millis() as u64));
        }
        let delay = delays
            .next()
            .unwrap_or(config.max_wait)
            .min(config.max_wait - elapsed);

        if cancel_open {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel.changed() => {
                    // Sender gone: nobody can cancel any more.
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
            }
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

fn failure_reason(status: RunStatus, output: Option<&serde_json::Value>) -> String {
    match output.and_then(|o| o.get("error")).and_then(|e| e.as_str()) {
        Some(error) => format!("{}: {}", status, error),
        None => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays statuses in order, repeating the last one
    struct Replay {
        statuses: Mutex<Vec<AppResult<Vec<RunInfo>>>>,
        calls: AtomicUsize,
    }

    impl Replay {
        fn new(statuses: Vec<AppResult<Vec<RunInfo>>>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for Replay {
        async fn runs(&self, _event_id: &str) -> AppResult<Vec<RunInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                match &statuses[0] {
                    Ok(runs) => Ok(runs.clone()),
                    Err(e) => Err(AppError::Internal(e.to_string())),
                }
            }
        }
    }

    fn run(status: RunStatus) -> AppResult<Vec<RunInfo>> {
        Ok(vec![RunInfo { status, output: None }])
    }

    fn fast() -> PollConfig {
        PollConfig {
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(4)),
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_completes_after_running() {
        let source = Replay::new(vec![
            Ok(vec![]),
            run(RunStatus::NotStarted),
            run(RunStatus::Running),
            Ok(vec![RunInfo {
                status: RunStatus::Completed,
                output: Some(serde_json::json!([])),
            }]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let info = poll_until_terminal(&source, "evt", &fast(), rx).await.unwrap();
        assert_eq!(info.status, RunStatus::Completed);
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_is_not_timeout() {
        let source = Replay::new(vec![Ok(vec![RunInfo {
            status: RunStatus::Failed,
            output: Some(serde_json::json!({"error": "LLM API error: overloaded"})),
        }])]);
        let (_tx, rx) = watch::channel(false);

        match poll_until_terminal(&source, "evt", &fast(), rx).await {
            Err(AppError::JobFailed(id, reason)) => {
                assert_eq!(id, "evt");
                assert_eq!(reason, "Failed: LLM API error: overloaded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_cancellation_is_failure() {
        let source = Replay::new(vec![run(RunStatus::Cancelled)]);
        let (_tx, rx) = watch::channel(false);
        let result = poll_until_terminal(&source, "evt", &fast(), rx).await;
        assert!(matches!(result, Err(AppError::JobFailed(_, reason)) if reason == "Cancelled"));
    }

    #[tokio::test]
    async fn test_times_out() {
        let source = Replay::new(vec![run(RunStatus::Running)]);
        let config = PollConfig {
            backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(10)),
            max_wait: Duration::from_millis(60),
        };
        let (_tx, rx) = watch::channel(false);

        let result = poll_until_terminal(&source, "evt", &config, rx).await;
        assert!(matches!(result, Err(AppError::PollTimeout(60))));
        assert!(source.calls() >= 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let source = Replay::new(vec![run(RunStatus::Running)]);
        let config = PollConfig {
            backoff: Backoff::new(Duration::from_secs(30), Duration::from_secs(30)),
            max_wait: Duration::from_secs(300),
        };
        let (tx, rx) = watch::channel(false);

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(true);
        });

        let started = Instant::now();
        let result = poll_until_terminal(&source, "evt", &config, rx).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        cancel.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_keeps_polling() {
        let source = Replay::new(vec![run(RunStatus::Running), run(RunStatus::Completed)]);
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let info = poll_until_terminal(&source, "evt", &fast(), rx).await.unwrap();
        assert_eq!(info.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let source = Replay::new(vec![
            Err(AppError::Internal("502".to_string())),
            run(RunStatus::Completed),
        ]);
        let (_tx, rx) = watch::channel(false);
        assert!(poll_until_terminal(&source, "evt", &fast(), rx).await.is_ok());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_http_status_source() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/events/evt-1/runs")
            .match_header("authorization", "Bearer signkey-dev")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"status": "Completed", "output": [{"fullName": "Ada", "email": "ada@x.com"}]}]}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/v1/events/gone/runs")
            .with_status(404)
            .create_async()
            .await;

        let source = HttpStatusSource::new(&server.url(), Some("signkey-dev".to_string()));
        let runs = source.runs("evt-1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        mock.assert_async().await;

        let (_tx, rx) = watch::channel(false);
        let result = poll_until_terminal(&source, "gone", &fast(), rx).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_job_queue_as_source() {
        let queue = crate::queue::testing::queue_printing(r#"[{"fullName":"Ada","email":"ada@x.com"}]"#);
        let sent = queue
            .send_import(crate::parser::parse("Name,Email\nAda,ada@x.com"), None)
            .await;
        let (_tx, rx) = watch::channel(false);

        let info = poll_until_terminal(&queue, &sent.event_id, &fast(), rx).await.unwrap();
        assert_eq!(info.output, Some(serde_json::json!([{"fullName": "Ada", "email": "ada@x.com"}])));
    }

    #[test]
    fn test_poll_config_from_settings() {
        let config = PollConfig::from(&PollSettings::default());
        assert_eq!(config.max_wait, Duration::from_secs(120));
        assert_eq!(config.backoff.delay(0), Duration::from_millis(250));
        assert_eq!(config.backoff.delay(10), Duration::from_secs(5));
    }
}

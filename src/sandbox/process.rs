//! Local Process Sandbox
//!
//! Runs generated programs with a local interpreter inside a scratch
//! directory that is deleted on kill. This gives filesystem scoping and a
//! wall-clock limit, but no network isolation: use it for development only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sandbox::{Execution, ExecutionError, Sandbox, SandboxProvider};
use crate::types::{AppError, AppResult};

const PROGRAM_FILE: &str = "main.js";
const DATA_FILE: &str = "contacts.csv";

/// One interpreter invocation
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout_ms: u64,
    pub env: HashMap<String, String>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            timeout_ms: 30_000,
            env: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured result of a finished (or timed out) process
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was killed or ended by a signal
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Map the process outcome onto the sandbox execution shape
    pub fn into_execution(self) -> Execution {
        let error = if self.timed_out {
            Some(ExecutionError {
                name: "TimeoutError".to_string(),
                value: format!("Execution exceeded {}ms", self.duration_ms),
                traceback: self.stderr.clone(),
            })
        } else if !self.success() {
            Some(error_from_stderr(&self.stderr, self.exit_code))
        } else {
            None
        };

        Execution {
            stdout: if self.stdout.is_empty() { Vec::new() } else { vec![self.stdout] },
            stderr: if self.stderr.is_empty() { Vec::new() } else { vec![self.stderr] },
            error,
        }
    }
}

/// Pull "Name: message" from the first matching stderr line, as printed by
/// JavaScript runtimes for uncaught errors.
fn error_from_stderr(stderr: &str, exit_code: i32) -> ExecutionError {
    let headline = stderr.lines().find_map(|line| {
        let (name, value) = line.split_once(": ")?;
        let is_name = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        is_name.then(|| (name.to_string(), value.to_string()))
    });

    let (name, value) = headline.unwrap_or_else(|| ("ExitError".to_string(), format!("exit code {}", exit_code)));

    ExecutionError {
        name,
        value,
        traceback: stderr.to_string(),
    }
}

pub async fn run_command(request: &CommandRequest) -> AppResult<CommandResult> {
    let started = Instant::now();

    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .current_dir(&request.cwd)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| AppError::Sandbox(format!("Failed to start {}: {}", request.program, e)))?;

    let timeout = std::time::Duration::from_millis(request.timeout_ms);
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output.map_err(|e| AppError::Sandbox(format!("Process failed: {}", e)))?;
            Ok(CommandResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out: false,
            })
        }
        // The child future was dropped, kill_on_drop reaps the process.
        Err(_) => Ok(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration_ms: request.timeout_ms,
            timed_out: true,
        }),
    }
}

pub struct ProcessSandboxProvider {
    interpreter: String,
    timeout_ms: u64,
    root: PathBuf,
}

impl ProcessSandboxProvider {
    pub fn new(interpreter: &str, timeout_ms: u64) -> Self {
        Self::with_root(interpreter, timeout_ms, std::env::temp_dir())
    }

    /// Scratch directories are created under `root`
    pub fn with_root(interpreter: &str, timeout_ms: u64, root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            timeout_ms,
            root: root.into(),
        }
    }
}

#[async_trait]
impl SandboxProvider for ProcessSandboxProvider {
    /// Relative to the scratch directory the program runs in
    fn data_path(&self) -> &str {
        DATA_FILE
    }

    async fn create(&self) -> AppResult<Arc<dyn Sandbox>> {
        let id = Uuid::new_v4().to_string();
        let dir = self.root.join(format!("contact-import-{}", id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to create {}: {}", dir.display(), e)))?;

        info!(sandbox_id = %id, dir = %dir.display(), "Process sandbox created");

        Ok(Arc::new(ProcessSandbox {
            data_path: dir.join(DATA_FILE).to_string_lossy().into_owned(),
            id,
            dir,
            interpreter: self.interpreter.clone(),
            timeout_ms: self.timeout_ms,
        }))
    }
}

pub struct ProcessSandbox {
    id: String,
    dir: PathBuf,
    data_path: String,
    interpreter: String,
    timeout_ms: u64,
}

impl ProcessSandbox {
    /// Relative paths resolve inside the scratch directory; absolute paths
    /// must already point into it.
    fn resolve(&self, path: &str) -> AppResult<PathBuf> {
        let path = Path::new(path);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        };
        if !resolved.starts_with(&self.dir) || resolved.components().any(|c| c.as_os_str() == "..") {
            return Err(AppError::Sandbox(format!(
                "Path {} escapes the sandbox",
                resolved.display()
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &str) -> AppResult<()> {
        let target = self.resolve(path)?;
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to write {}: {}", target.display(), e)))?;
        debug!(sandbox_id = %self.id, path = %target.display(), "Wrote sandbox file");
        Ok(())
    }

    async fn run_code(&self, code: &str) -> AppResult<Execution> {
        self.write_file(PROGRAM_FILE, code).await?;

        let request = CommandRequest::new(&self.interpreter, &self.dir)
            .with_arg(PROGRAM_FILE)
            .with_timeout(self.timeout_ms)
            .with_env("CONTACTS_CSV", &self.data_path);

        let result = run_command(&request).await?;
        if result.timed_out {
            warn!(sandbox_id = %self.id, timeout_ms = self.timeout_ms, "Sandbox program timed out");
        }
        debug!(
            sandbox_id = %self.id,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Sandbox program finished"
        );
        Ok(result.into_execution())
    }

    async fn kill(&self) -> AppResult<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Sandbox(format!(
                "Failed to remove {}: {}",
                self.dir.display(),
                e
            ))),
        }
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::types::LLMProvider;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
    pub jobs: JobsConfig,
    pub poll: PollSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub groq_api_key: String,
    pub base_url: Option<String>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            openai_api_key: String::new(),
            openrouter_api_key: String::new(),
            groq_api_key: String::new(),
            base_url: None,
        }
    }
}

impl LLMConfig {
    /// Non-empty API key for the given provider
    pub fn api_key_for(&self, provider: LLMProvider) -> Option<String> {
        let key = match provider {
            LLMProvider::OpenAI => &self.openai_api_key,
            LLMProvider::OpenRouter => &self.openrouter_api_key,
            LLMProvider::Groq => &self.groq_api_key,
        };
        (!key.is_empty()).then(|| key.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// "remote" (HTTP sandbox service) or "process" (local node process)
    pub provider: String,
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub node_bin: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: "remote".to_string(),
            url: "http://localhost:49999".to_string(),
            api_key: None,
            timeout_ms: 30_000,
            node_bin: "node".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Seconds a finished run stays visible on the status endpoint
    pub run_retention_secs: u64,
}

impl AgentConfig {
    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            run_retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub base_url: String,
    pub signing_key: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8288".to_string(),
            signing_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    pub initial_ms: u64,
    pub max_interval_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_interval_ms: 5_000,
            max_wait_ms: 120_000,
        }
    }
}

impl PollSettings {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

fn var_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        Ok(Self {
            server: ServerConfig {
                port: var_or("PORT", defaults.server.port)?,
                host: var_string("HOST", &defaults.server.host),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .map(|origins| {
                        origins
                            .split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or(defaults.server.cors_allowed_origins),
            },
            llm: LLMConfig {
                provider: var_string("LLM_PROVIDER", &defaults.llm.provider),
                model: var_string("LLM_MODEL", &defaults.llm.model),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
                groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
                base_url: env::var("LLM_BASE_URL").ok(),
            },
            sandbox: SandboxConfig {
                provider: var_string("SANDBOX_PROVIDER", &defaults.sandbox.provider),
                url: var_string("SANDBOX_URL", &defaults.sandbox.url),
                api_key: env::var("SANDBOX_API_KEY").ok(),
                timeout_ms: var_or("SANDBOX_TIMEOUT_MS", defaults.sandbox.timeout_ms)?,
                node_bin: var_string("SANDBOX_NODE_BIN", &defaults.sandbox.node_bin),
            },
            agent: AgentConfig {
                max_iterations: var_or("AGENT_MAX_ITERATIONS", defaults.agent.max_iterations)?,
                run_retention_secs: var_or("AGENT_RUN_RETENTION_SECS", defaults.agent.run_retention_secs)?,
            },
            jobs: JobsConfig {
                base_url: var_string("JOBS_BASE_URL", &defaults.jobs.base_url),
                signing_key: env::var("JOBS_SIGNING_KEY").ok().filter(|k| !k.is_empty()),
            },
            poll: PollSettings {
                initial_ms: var_or("POLL_INITIAL_MS", defaults.poll.initial_ms)?,
                max_interval_ms: var_or("POLL_MAX_INTERVAL_MS", defaults.poll.max_interval_ms)?,
                max_wait_ms: var_or("POLL_MAX_WAIT_MS", defaults.poll.max_wait_ms)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.run_retention(), Duration::from_secs(3_600));
        assert_eq!(config.poll.initial(), Duration::from_millis(250));
        assert_eq!(config.jobs.base_url, "http://localhost:8288");
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_api_key_for_ignores_empty_keys() {
        let config = LLMConfig {
            openai_api_key: "sk-test".to_string(),
            ..LLMConfig::default()
        };
        assert_eq!(config.api_key_for(LLMProvider::OpenAI).as_deref(), Some("sk-test"));
        assert_eq!(config.api_key_for(LLMProvider::Groq), None);
    }

    #[test]
    fn test_var_or_rejects_garbage() {
        env::set_var("CONTACT_IMPORT_TEST_PORT", "not-a-port");
        let parsed: Result<u16> = var_or("CONTACT_IMPORT_TEST_PORT", 1);
        assert!(parsed.is_err());
        env::remove_var("CONTACT_IMPORT_TEST_PORT");
        assert_eq!(var_or::<u16>("CONTACT_IMPORT_TEST_PORT", 7).unwrap(), 7);
    }
}

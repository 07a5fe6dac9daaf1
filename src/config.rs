//! Server configuration from `GRADER_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::github::{RetryConfig, SyncConfig};
use crate::handlers::HandlerConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;
const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 600;
const DEFAULT_WORKSPACE_DIR: &str = "./workspace";
const DEFAULT_RUNNER_COMMAND: &str = "grader-runner";
const DEFAULT_SYNC_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SYNC_CONCURRENCY: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Everything `main` needs to wire the service together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub webhook_secret: String,
    pub listen_addr: SocketAddr,
    pub max_concurrent_jobs: usize,
    /// Runner timeout for assignments and courses that set none.
    pub runner_timeout: Duration,
    pub github_token: Option<String>,
    pub workspace_dir: PathBuf,
    pub seed_file: Option<PathBuf>,
    /// Program and arguments run once per test job.
    pub runner_command: Vec<String>,
    pub sync_max_attempts: u32,
    pub sync_concurrency: usize,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GRADER_WEBHOOK_SECRET` | required |
    /// | `GRADER_LISTEN_ADDR` | `0.0.0.0:3000` |
    /// | `GRADER_MAX_CONCURRENT_JOBS` | `5` |
    /// | `GRADER_RUNNER_TIMEOUT_SECS` | `600` |
    /// | `GRADER_GITHUB_TOKEN` | unset |
    /// | `GRADER_WORKSPACE_DIR` | `./workspace` |
    /// | `GRADER_SEED_FILE` | unset |
    /// | `GRADER_RUNNER_COMMAND` | `grader-runner` |
    /// | `GRADER_SYNC_MAX_ATTEMPTS` | `3` |
    /// | `GRADER_SYNC_CONCURRENCY` | `10` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let webhook_secret =
            get("GRADER_WEBHOOK_SECRET").ok_or(ConfigError::Missing("GRADER_WEBHOOK_SECRET"))?;

        let runner_command: Vec<String> = get("GRADER_RUNNER_COMMAND")
            .unwrap_or_else(|| DEFAULT_RUNNER_COMMAND.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Config {
            webhook_secret,
            listen_addr: parse_or(&get, "GRADER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR.parse().ok())?,
            max_concurrent_jobs: parse_or(
                &get,
                "GRADER_MAX_CONCURRENT_JOBS",
                Some(DEFAULT_MAX_CONCURRENT_JOBS),
            )?,
            runner_timeout: Duration::from_secs(parse_or(
                &get,
                "GRADER_RUNNER_TIMEOUT_SECS",
                Some(DEFAULT_RUNNER_TIMEOUT_SECS),
            )?),
            github_token: get("GRADER_GITHUB_TOKEN"),
            workspace_dir: get("GRADER_WORKSPACE_DIR")
                .unwrap_or_else(|| DEFAULT_WORKSPACE_DIR.to_string())
                .into(),
            seed_file: get("GRADER_SEED_FILE").map(PathBuf::from),
            runner_command,
            sync_max_attempts: parse_or(
                &get,
                "GRADER_SYNC_MAX_ATTEMPTS",
                Some(DEFAULT_SYNC_MAX_ATTEMPTS),
            )?,
            sync_concurrency: parse_or(
                &get,
                "GRADER_SYNC_CONCURRENCY",
                Some(DEFAULT_SYNC_CONCURRENCY),
            )?,
        })
    }

    /// Handler tuning derived from this configuration.
    pub fn handler_config(&self) -> HandlerConfig {
        let retry = RetryConfig::DEFAULT.with_max_attempts(self.sync_max_attempts);
        HandlerConfig {
            workspace_dir: self.workspace_dir.clone(),
            default_runner_timeout: self.runner_timeout,
            retry: RetryConfig::DEFAULT,
            sync: SyncConfig {
                retry,
                concurrency: self.sync_concurrency,
                ..SyncConfig::default()
            },
        }
    }
}

/// Parses `name` if set, else returns `default`.
fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

//! Configuration for labflow components.
//!
//! Every field has a serde default, so a partial JSON document (or `{}`)
//! yields a usable configuration. Credentials are not part of the
//! configuration; the access token is passed to [`GitHubClient`] directly.
//!
//! [`GitHubClient`]: crate::remote::GitHubClient

use crate::backoff::{BackoffPolicy, JitterStrategy};
use crate::errors::LabflowError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for every duration setting, in seconds (one week).
pub const MAX_DURATION_SECONDS: f64 = 604_800.0;

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DURATION_SECONDS)).unwrap_or(Duration::ZERO)
}

fn check_seconds(field: &str, value: f64, allow_zero: bool) -> Result<(), LabflowError> {
    let in_range = value.is_finite()
        && value <= MAX_DURATION_SECONDS
        && if allow_zero { value >= 0.0 } else { value > 0.0 };
    if in_range {
        Ok(())
    } else {
        let lower = if allow_zero { "at least 0" } else { "greater than 0" };
        Err(LabflowError::InvalidConfig(format!(
            "{field} must be {lower} and at most {MAX_DURATION_SECONDS} seconds, got {value}"
        )))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabflowConfig {
    /// VCS-hosting API settings.
    #[serde(default)]
    pub github: GitHubConfig,
    /// Retry settings.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Dispatch-and-poll settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Branch fan-out settings.
    #[serde(default)]
    pub fanout: FanoutConfig,
}

impl LabflowConfig {
    /// Parses and validates a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, LabflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every duration is finite, in range, and that the poll
    /// interval is positive.
    pub fn validate(&self) -> Result<(), LabflowError> {
        check_seconds("github.request_timeout_seconds", self.github.request_timeout_seconds, false)?;
        check_seconds("backoff.base_seconds", self.backoff.base_seconds, true)?;
        check_seconds("backoff.max_wait_seconds", self.backoff.max_wait_seconds, true)?;
        check_seconds(
            "backoff.secondary_max_wait_seconds",
            self.backoff.secondary_max_wait_seconds,
            true,
        )?;
        check_seconds("dispatch.poll_interval_seconds", self.dispatch.poll_interval_seconds, false)?;
        check_seconds("dispatch.timeout_seconds", self.dispatch.timeout_seconds, true)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Settings for the GitHub REST client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    "labflow/0.1".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl GitHubConfig {
    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Gets the request timeout as Duration, clamped to the accepted range.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds)
    }
}

/// Retry settings used to build [`BackoffPolicy`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay in seconds.
    #[serde(default = "default_base")]
    pub base_seconds: f64,
    /// Backoff ceiling for the primary caller.
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: f64,
    /// Backoff ceiling for the secondary caller.
    #[serde(default = "default_secondary_max_wait")]
    pub secondary_max_wait_seconds: f64,
    /// Attempt cap for LLM-facing calls.
    #[serde(default = "default_llm_attempts")]
    pub llm_max_attempts: u32,
    /// Attempt cap for VCS API calls.
    #[serde(default = "default_vcs_attempts")]
    pub vcs_max_attempts: u32,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base() -> f64 {
    1.0
}

fn default_max_wait() -> f64 {
    600.0
}

fn default_secondary_max_wait() -> f64 {
    180.0
}

fn default_llm_attempts() -> u32 {
    50
}

fn default_vcs_attempts() -> u32 {
    5
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_base(),
            max_wait_seconds: default_max_wait(),
            secondary_max_wait_seconds: default_secondary_max_wait(),
            llm_max_attempts: default_llm_attempts(),
            vcs_max_attempts: default_vcs_attempts(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl BackoffConfig {
    fn policy(&self, max_wait: f64, attempts: u32) -> BackoffPolicy {
        BackoffPolicy::primary()
            .with_base(seconds(self.base_seconds))
            .with_max_wait(seconds(max_wait))
            .with_max_attempts(attempts)
            .with_jitter(self.jitter)
    }

    /// Policy for the primary (LLM-facing) caller.
    #[must_use]
    pub fn primary_policy(&self) -> BackoffPolicy {
        self.policy(self.max_wait_seconds, self.llm_max_attempts)
    }

    /// Policy for the secondary caller.
    #[must_use]
    pub fn secondary_policy(&self) -> BackoffPolicy {
        self.policy(self.secondary_max_wait_seconds, self.llm_max_attempts)
    }

    /// Policy for VCS API calls.
    #[must_use]
    pub fn vcs_policy(&self) -> BackoffPolicy {
        self.policy(self.max_wait_seconds, self.vcs_max_attempts)
    }
}

/// Dispatch-and-poll settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Interval between poll ticks in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Overall poll budget in seconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: f64,
    /// Whether failing sub-jobs are logged when a run fails.
    #[serde(default = "default_diagnose")]
    pub diagnose_on_failure: bool,
}

fn default_poll_interval() -> f64 {
    10.0
}

fn default_poll_timeout() -> f64 {
    600.0
}

fn default_diagnose() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            timeout_seconds: default_poll_timeout(),
            diagnose_on_failure: default_diagnose(),
        }
    }
}

impl DispatchConfig {
    /// Sets the poll interval and overall timeout.
    #[must_use]
    pub fn with_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval_seconds = poll_interval.as_secs_f64();
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds)
    }

    /// Gets the overall timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }
}

/// Branch fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Maximum concurrent branch creations; `None` means unbounded.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: Option<usize>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_concurrency() -> Option<usize> {
    Some(8)
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl FanoutConfig {
    /// Removes the concurrency cap.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_concurrency: None,
        }
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_concurrency(max: usize) -> Self {
        Self {
            max_concurrency: Some(max.max(1)),
        }
    }
}

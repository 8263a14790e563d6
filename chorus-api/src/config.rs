//! Service configuration
//!
//! Sources, highest priority first:
//! 1. Command-line arguments (`--port`, `--bind`, `--root-folder`)
//! 2. Environment variables (`CHORUS_*`, `ANTHROPIC_API_KEY`)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! A missing TOML file is not an error; a malformed one is.

use chorus_common::config::{config_file_path, load_toml_file};
use chorus_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::llm::DEFAULT_BASE_URL;
use crate::rate_limit::{RateLimitConfig, RateLimitPolicies};
use crate::safety::SafetyFailurePolicy;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5740;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub root_folder: Option<PathBuf>,
    pub bind: String,
    pub port: u16,
    pub logging: LoggingConfig,
    pub rate_limits: RateLimitsConfig,
    /// Interval between sweeps of expired rate-limit entries
    pub rate_limit_sweep_secs: u64,
    pub problems: ProblemsConfig,
    pub anthropic: AnthropicConfig,
    pub safety: SafetyConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            logging: LoggingConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            rate_limit_sweep_secs: 60,
            problems: ProblemsConfig::default(),
            anthropic: AnthropicConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One `[rate_limits.<action>]` table
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RateLimitSection {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl From<RateLimitSection> for RateLimitConfig {
    fn from(section: RateLimitSection) -> Self {
        RateLimitConfig::new(section.max_requests, Duration::from_secs(section.window_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub contribute: RateLimitSection,
    pub synthesise: RateLimitSection,
    pub submit: RateLimitSection,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        let policies = RateLimitPolicies::default();
        let section = |c: RateLimitConfig| RateLimitSection {
            window_secs: c.window.as_secs(),
            max_requests: c.max_requests,
        };
        Self {
            contribute: section(policies.contribute),
            synthesise: section(policies.synthesise),
            submit: section(policies.submit),
        }
    }
}

impl RateLimitsConfig {
    pub fn to_policies(&self) -> RateLimitPolicies {
        RateLimitPolicies {
            contribute: self.contribute.into(),
            synthesise: self.synthesise.into(),
            submit: self.submit.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProblemsConfig {
    /// Threshold stamped on new problems
    pub default_contribution_threshold: i64,
}

impl Default for ProblemsConfig {
    fn default() -> Self {
        Self {
            default_contribution_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub safety_model: String,
    pub synthesis_model: String,
    pub safety_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub synthesis_max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            safety_model: "claude-3-5-haiku-20241022".to_string(),
            synthesis_model: "claude-sonnet-4-20250514".to_string(),
            safety_timeout_secs: 10,
            synthesis_timeout_secs: 90,
            synthesis_max_tokens: 2048,
        }
    }
}

impl AnthropicConfig {
    pub fn safety_timeout(&self) -> Duration {
        Duration::from_secs(self.safety_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub on_failure: SafetyFailurePolicy,
}

impl ServiceConfig {
    /// Load from `path`, or from the discovered config file, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(config_file_path);
        match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                load_toml_file(&path)
            }
            Some(path) => Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            ))),
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Takes a lookup function so callers (and tests) decide where values
    /// come from; `main` passes `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.anthropic.api_key = Some(key);
        }
        if let Some(url) = lookup("CHORUS_ANTHROPIC_BASE_URL") {
            self.anthropic.base_url = url;
        }
        if let Some(level) = lookup("CHORUS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(policy) = lookup("CHORUS_SAFETY_ON_FAILURE") {
            self.safety.on_failure = match policy.trim() {
                "fail_open" => SafetyFailurePolicy::FailOpen,
                "fail_closed" => SafetyFailurePolicy::FailClosed,
                other => {
                    return Err(Error::Config(format!(
                        "CHORUS_SAFETY_ON_FAILURE must be fail_open or fail_closed, got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(threshold) = lookup("CHORUS_DEFAULT_THRESHOLD") {
            self.problems.default_contribution_threshold = threshold.trim().parse().map_err(|e| {
                Error::Config(format!("CHORUS_DEFAULT_THRESHOLD '{}': {}", threshold, e))
            })?;
        }
        Ok(())
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, section) in [
            ("contribute", &self.rate_limits.contribute),
            ("synthesise", &self.rate_limits.synthesise),
            ("submit", &self.rate_limits.submit),
        ] {
            if section.max_requests == 0 || section.window_secs == 0 {
                return Err(Error::Config(format!(
                    "rate_limits.{}: window_secs and max_requests must be positive",
                    name
                )));
            }
        }
        if self.problems.default_contribution_threshold < 1 {
            return Err(Error::Config(
                "problems.default_contribution_threshold must be at least 1".to_string(),
            ));
        }
        if self.anthropic.safety_timeout_secs == 0 || self.anthropic.synthesis_timeout_secs == 0 {
            return Err(Error::Config("anthropic timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

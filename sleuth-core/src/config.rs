//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/sleuth/config.toml` and/or `.sleuth/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration passed to the orchestrator at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleuthConfig {
    /// Directory holding one JSON document per session.
    pub data_dir: PathBuf,
    pub search: SearchConfig,
    pub planner: PlannerConfig,
    pub report: ReportConfig,
    pub llm: LlmConfig,
}

impl Default for SleuthConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("research_data"),
            search: SearchConfig::default(),
            planner: PlannerConfig::default(),
            report: ReportConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl SleuthConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "search.max_concurrency must be at least 1".into(),
            });
        }
        if self.search.per_task_timeout_ms == 0 || self.search.overall_deadline_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "search timeouts must be greater than zero".into(),
            });
        }
        if self.report.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "report.timeout_secs must be greater than zero".into(),
            });
        }
        if self.planner.max_items == 0 {
            return Err(ConfigError::Invalid {
                message: "planner.max_items must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }
}

/// Limits for the concurrent search executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum searches in flight at once.
    pub max_concurrency: usize,
    /// Pause before each task competes for a concurrency slot.
    pub stagger_delay_ms: u64,
    /// Bound on a single provider call.
    pub per_task_timeout_ms: u64,
    /// Wall-clock bound on the whole batch.
    pub overall_deadline_ms: u64,
    /// Queries longer than this are truncated before searching.
    pub max_query_chars: usize,
    /// Results longer than this are truncated with a notice.
    pub max_result_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            stagger_delay_ms: 1_000,
            per_task_timeout_ms: 60_000,
            overall_deadline_ms: 300_000,
            max_query_chars: 200,
            max_result_chars: 5_000,
        }
    }
}

impl SearchConfig {
    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }

    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_millis(self.per_task_timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on search plan size.
    pub max_items: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_items: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Whether to call the report generator; otherwise a deterministic report is derived.
    pub use_generator: bool,
    /// Bound on generation plus stream aggregation.
    pub timeout_secs: u64,
    /// Maximum characters of search results sent to the generator.
    pub max_input_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            use_generator: true,
            timeout_secs: 300,
            max_input_chars: 8_000,
        }
    }
}

impl ReportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the text-generation service behind the planner and report generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Used when `model` is blank.
    pub fallback_model: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Request server-sent events for report generation.
    pub use_streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            fallback_model: "gpt-3.5-turbo-0125".to_string(),
            request_timeout_secs: 120,
            use_streaming: true,
        }
    }
}

impl LlmConfig {
    /// The primary model, or the fallback if the primary is unset.
    pub fn effective_model(&self) -> &str {
        if self.model.trim().is_empty() {
            tracing::warn!(
                fallback = %self.fallback_model,
                "Primary model is not configured, falling back"
            );
            &self.fallback_model
        } else {
            &self.model
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SLEUTH_`)
/// 3. Workspace-local config (`.sleuth/config.toml`)
/// 4. User config (`~/.config/sleuth/config.toml`)
/// 5. Built-in defaults
///
/// `overrides` is a complete configuration merged on top of every other
/// layer, so each of its keys (including ones left at their defaults)
/// replaces the value from files and the environment. Callers that only
/// want to change a few keys should load with `None` and edit the result.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".sleuth").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SLEUTH_SEARCH__MAX_CONCURRENCY, SLEUTH_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: SleuthConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// `~/.config/sleuth/config.toml` or the platform equivalent.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sleuth", "sleuth")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Platform data directory for logs and default session storage.
pub fn default_data_root() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sleuth", "sleuth").map(|dirs| dirs.data_dir().to_path_buf())
}

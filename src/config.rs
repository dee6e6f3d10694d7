//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// GitHub API settings
    #[serde(default)]
    pub github: GithubConfig,

    /// Gemini model settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Workflow execution settings
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Build and test commands run against the target repository
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Queue persistence settings
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .mend/config.toml in current directory
            let local = PathBuf::from(".mend/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.mend/config.toml
            dirs::home_dir().map(|h| h.join(".mend/config.toml"))
        });

        match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Ok(Config::default()),
        }
    }

    /// Resolve the GitHub token from config or `GITHUB_TOKEN`
    pub fn github_token(&self) -> Result<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Config("github token not set (config or GITHUB_TOKEN)".to_string())
            })
    }

    /// Resolve the Gemini API key from config or `GEMINI_API_KEY`
    pub fn gemini_api_key(&self) -> Result<String> {
        self.gemini
            .api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config("gemini api key not set (config or GEMINI_API_KEY)".to_string())
            })
    }
}

/// GitHub API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token (falls back to GITHUB_TOKEN)
    #[serde(default)]
    pub token: Option<String>,

    /// API base URL (override for GitHub Enterprise)
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_github_api_url(),
        }
    }
}

/// Gemini model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key (falls back to GEMINI_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Output token cap per request
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Workflow execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Attempt budget per workflow for retryable failures
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum workflows running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Scheduler poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_concurrent: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Build and test command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Shell command that builds the target repository
    #[serde(default = "default_build_command")]
    pub build: String,

    /// Shell command that runs the target repository's tests
    #[serde(default = "default_test_command")]
    pub test: String,
}

fn default_build_command() -> String {
    "cargo build".to_string()
}

fn default_test_command() -> String {
    "cargo test".to_string()
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            build: default_build_command(),
            test: default_test_command(),
        }
    }
}

/// Queue persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Snapshot file path
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from(".mend/queue.json")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
        }
    }
}

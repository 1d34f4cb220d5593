//! Configuration for the benchmark harness.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{BenchError, Result};
use crate::parser::YearBounds;
use crate::task::PathRewrite;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pixel budget for a single encoded image.
pub const DEFAULT_MAX_PIXELS: u64 = 2_800_000;

/// Inference endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible endpoint (e.g., "http://localhost:8000")
    pub api_base: String,

    /// API key for authentication (local servers usually need none)
    #[serde(default)]
    pub api_key: String,

    /// Model identifier sent with every request
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            api_key: String::new(),
            model: "Qwen3-VL-4B-Instruct".to_string(),
        }
    }
}

/// Settings of the run loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Pixel budget per image before downscaling kicks in
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,

    /// Overrides the per-variant request timeout when set
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Default result store when the CLI does not name one
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Foreign path prefix rewriting for benchmark image references
    #[serde(default)]
    pub path_rewrite: Option<PathRewrite>,

    /// Plausible range for extracted years
    #[serde(default)]
    pub years: YearBounds,

    /// Fixed seed for option shuffling; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_pixels: default_max_pixels(),
            timeout_secs: None,
            output: None,
            path_rewrite: None,
            years: YearBounds::default(),
            seed: None,
        }
    }
}

impl HarnessConfig {
    /// Timeout override as a duration.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Run loop settings
    #[serde(default)]
    pub harness: HarnessConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    harness: Option<HarnessFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarnessFileSection {
    max_pixels: Option<u64>,
    timeout_secs: Option<u64>,
    output: Option<PathBuf>,
    path_rewrite: Option<PathRewrite>,
    min_year: Option<i32>,
    max_year: Option<i32>,
    seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, BENCH_*)
    /// 2. Config file (explicit path, else ~/.config/vlm-chrono-bench/config.yaml)
    /// 3. Default values
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::config_file_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Config::default(),
            },
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Ok(max_pixels) = env::var("BENCH_MAX_PIXELS") {
            if let Ok(pixels) = max_pixels.parse() {
                self.harness.max_pixels = pixels;
            }
        }

        if let Ok(timeout) = env::var("BENCH_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.harness.timeout_secs = Some(secs);
            }
        }

        if let Ok(seed) = env::var("BENCH_SEED") {
            if let Ok(seed) = seed.parse() {
                self.harness.seed = Some(seed);
            }
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        Self::from_yaml(&content)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| BenchError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
        }

        if let Some(harness) = file_config.harness {
            if let Some(max_pixels) = harness.max_pixels {
                config.harness.max_pixels = max_pixels;
            }
            config.harness.timeout_secs = harness.timeout_secs;
            config.harness.output = harness.output;
            config.harness.path_rewrite = harness.path_rewrite;
            if let Some(min_year) = harness.min_year {
                config.harness.years.min_year = min_year;
            }
            if let Some(max_year) = harness.max_year {
                config.harness.years.max_year = max_year;
            }
            config.harness.seed = harness.seed;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "vlm-chrono-bench")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(BenchError::Config(
                "Endpoint base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(BenchError::Config(
                "Model identifier is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        if self.harness.max_pixels < 28 * 28 {
            return Err(BenchError::Config(format!(
                "Pixel budget {} is below one 28x28 tile",
                self.harness.max_pixels
            )));
        }

        if self.harness.timeout_secs == Some(0) {
            return Err(BenchError::Config("Timeout must be positive".to_string()));
        }

        if self.harness.years.min_year > self.harness.years.max_year {
            return Err(BenchError::Config(format!(
                "Year range is empty: {} > {}",
                self.harness.years.min_year, self.harness.years.max_year
            )));
        }

        Ok(())
    }

    /// Create a config pointing at an explicit endpoint (useful for testing).
    pub fn with_endpoint(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                model: model.into(),
                ..Default::default()
            },
            harness: HarnessConfig::default(),
        }
    }
}

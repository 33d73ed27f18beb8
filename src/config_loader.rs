use crate::errors::{PrefError, PrefResult};
use crate::log_sink::LogFormat;
use crate::query_selector::SelectionPolicy;
use crate::reward_trainer::TrainerConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "preflearn.toml";
pub const ENV_PREFIX: &str = "PREFLEARN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefConfig {
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
}

fn default_hidden_dim() -> usize {
    64
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            hidden_dim: default_hidden_dim(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub policy: SelectionPolicy,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryTargetKind {
    #[default]
    File,
    Stdout,
    Tracing,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub target: SummaryTargetKind,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("runs")
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            target: SummaryTargetKind::default(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PrefConfig {
    fn default() -> Self {
        PrefConfig {
            trainer: TrainerConfig::default(),
            model: ModelConfig::default(),
            selector: SelectorConfig::default(),
            summary: SummaryConfig::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl PrefConfig {
    pub fn validate(&self) -> PrefResult<()> {
        self.trainer.validate()?;
        if self.model.hidden_dim == 0 {
            return Err(PrefError::config("model.hidden_dim must be at least 1"));
        }
        if self.log_level.trim().is_empty() {
            return Err(PrefError::config("log_level cannot be empty"));
        }
        Ok(())
    }
}

/// Layered configuration: defaults, then the TOML file, then
/// `PREFLEARN_` environment variables (`__` separates nested keys).
pub fn figment(path: Option<&Path>) -> Figment {
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(PrefConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: Option<&Path>) -> PrefResult<PrefConfig> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(PrefError::config(format!("config file {} not found", path.display())));
        }
    }

    let config: PrefConfig = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

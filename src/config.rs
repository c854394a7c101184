//! Configuration loader and validator for the article pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub wechat: WeChat,
    pub llm: Llm,
    pub image: Image,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub prompts_dir: String,
    #[serde(default = "default_style")]
    pub style: String,
}

/// Publishing platform credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeChat {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default = "default_wechat_base")]
    pub api_base: String,
    #[serde(default = "default_author")]
    pub author: String,
}

/// Chat-completions endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    pub api_base: String,
    pub api_key: String,
    /// Separate endpoint for long-form writing; falls back to `api_base`.
    #[serde(default)]
    pub writer_api_base: Option<String>,
    #[serde(default)]
    pub writer_api_key: Option<String>,
    pub writer_model: String,
    pub layout_model: String,
}

/// Image-generation endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub api_url: String,
    pub model: String,
    #[serde(default = "default_image_size")]
    pub size: String,
}

fn default_style() -> String {
    "default".into()
}

fn default_wechat_base() -> String {
    "https://api.weixin.qq.com".into()
}

fn default_author() -> String {
    "AI Writer".into()
}

fn default_image_size() -> String {
    "1024x1024".into()
}

impl Llm {
    pub fn writer_base(&self) -> &str {
        self.writer_api_base
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.api_base)
    }

    pub fn writer_key(&self) -> &str {
        self.writer_api_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.api_key)
    }
}

impl App {
    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("images")
    }

    pub fn debug_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("debug")
    }
}

impl Config {
    /// Ensure required directories exist: `app.data_dir` plus its `images/`
    /// and `debug/` children.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)?;
        fs::create_dir_all(self.app.images_dir())?;
        fs::create_dir_all(self.app.debug_dir())
    }

    /// Default SQLite URL for the topic queue inside the data directory.
    pub fn default_database_url(&self) -> String {
        format!("sqlite://{}/content_wizard.db", self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.to_ascii_lowercase().contains("your_")
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.prompts_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.prompts_dir must be non-empty"));
    }

    if is_unset(&cfg.wechat.app_id) {
        return Err(ConfigError::Invalid("wechat.app_id must be set"));
    }
    if is_unset(&cfg.wechat.app_secret) {
        return Err(ConfigError::Invalid("wechat.app_secret must be set"));
    }
    if cfg.wechat.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("wechat.api_base must be non-empty"));
    }

    if cfg.llm.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.api_base must be non-empty"));
    }
    if is_unset(&cfg.llm.api_key) {
        return Err(ConfigError::Invalid("llm.api_key must be set"));
    }
    if cfg.llm.writer_model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.writer_model must be non-empty"));
    }
    if cfg.llm.layout_model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.layout_model must be non-empty"));
    }

    if cfg.image.api_url.trim().is_empty() {
        return Err(ConfigError::Invalid("image.api_url must be non-empty"));
    }
    if cfg.image.model.trim().is_empty() {
        return Err(ConfigError::Invalid("image.model must be non-empty"));
    }

    Ok(())
}

/// Returns an example YAML configuration with working placeholder values.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  prompts_dir: "./prompts"
  style: "default"

wechat:
  app_id: "wx1234567890abcdef"
  app_secret: "0123456789abcdef0123456789abcdef"
  api_base: "https://api.weixin.qq.com"
  author: "AI Writer"

llm:
  api_base: "https://open.cherryin.ai/v1"
  api_key: "sk-example-key"
  writer_model: "anthropic/claude-opus-4.5"
  layout_model: "google/gemini-3-flash-preview"

image:
  api_url: "https://open.cherryin.ai/v1/images/generations"
  model: "qwen/qwen-image(free)"
  size: "1024x1024"
"#
}

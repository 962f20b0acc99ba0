use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub reveal_interval_ms: u64,
    pub max_input_chars: usize,
    pub strip_think_tags: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// Most recent choice, only used to mark it in the picker.
    pub last_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            reveal_interval_ms: 20,
            max_input_chars: 500,
            strip_think_tags: true,
            log_level: "info".to_string(),
            log_file: None,
            last_model: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Record the latest model choice in the file at `path`.
    pub fn save_last_model(path: &Path, model: &str) -> Result<()> {
        let mut config = Self::load_from(path).unwrap_or_default();
        config.last_model = Some(model.to_string());
        config.save_to(path)
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }

    /// Where TUI logs go unless `log_file` says otherwise.
    pub fn log_path(&self) -> Result<PathBuf> {
        match &self.log_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::get_config_dir()?.join("chatbot.log")),
        }
    }

    fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("chatbot-tui"))
    }

    pub fn path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.json"))
    }
}

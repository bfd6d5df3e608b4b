//! Engine Configuration
//!
//! JSON file with every field defaulted, plus `DOCFORGE_*` environment
//! overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::print::PrintSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Opening/closing markers of template commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "+++".to_string(),
            close: "+++".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_browser_program")]
    pub program: String,
    /// Inserted before the conversion arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_browser_program() -> String { "chromium".to_string() }
fn default_timeout_secs() -> u64 { 60 }

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            program: default_browser_program(),
            extra_args: vec![],
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BrowserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub delimiters: Delimiters,
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub print: PrintSpec,
    /// 1-based sheet index substituted in spreadsheet templates.
    #[serde(default = "default_sheet")]
    pub spreadsheet_sheet: usize,
}

fn default_template_dir() -> PathBuf { PathBuf::from("templates") }
fn default_sheet() -> usize { 1 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            template_dir: default_template_dir(),
            browser: BrowserConfig::default(),
            print: PrintSpec::default(),
            spreadsheet_sheet: default_sheet(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Layer `DOCFORGE_TEMPLATE_DIR`, `DOCFORGE_BROWSER` and
    /// `DOCFORGE_CONVERT_TIMEOUT_SECS` from `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DOCFORGE_TEMPLATE_DIR").filter(|v| !v.is_empty()) {
            self.template_dir = PathBuf::from(dir);
        }
        if let Some(program) = lookup("DOCFORGE_BROWSER").filter(|v| !v.is_empty()) {
            self.browser.program = program;
        }
        if let Some(secs) = lookup("DOCFORGE_CONVERT_TIMEOUT_SECS") {
            self.browser.timeout_secs = secs.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "DOCFORGE_CONVERT_TIMEOUT_SECS",
                message: format!("'{secs}' is not a number of seconds"),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiters.open.is_empty() || self.delimiters.close.is_empty() {
            return Err(ConfigError::Invalid {
                key: "delimiters",
                message: "command delimiters must not be empty".to_string(),
            });
        }
        if self.browser.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "browser.timeoutSecs",
                message: "conversion timeout must be positive".to_string(),
            });
        }
        self.print.check().map_err(|message| ConfigError::Invalid {
            key: "print.margins",
            message: message.to_string(),
        })?;
        if self.spreadsheet_sheet == 0 {
            return Err(ConfigError::Invalid {
                key: "spreadsheetSheet",
                message: "sheet index is 1-based".to_string(),
            });
        }
        Ok(())
    }
}

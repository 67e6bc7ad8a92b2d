//! Configuration management for smart-term.
//!
//! Configuration is loaded from `~/.config/smart-term/config.toml` (or the
//! file named by `SMART_TERM_CONFIG`), then overridden from `SMART_TERM_*`
//! environment variables. Every key is optional and unknown keys are ignored.

use crate::models::ModelFlag;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model used when no model flag is given.
    #[serde(default)]
    pub default_model: ModelFlag,
    /// Completion service (only `perplexity` is available).
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Largest attachment accepted, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// How answers are rendered.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Show the spinner while waiting for the first token.
    #[serde(default = "default_true")]
    pub show_thinking_animation: bool,
    /// Verbosity of the log file.
    #[serde(default)]
    pub log_level: LogLevel,
    /// List cited sources under the answer even without `--show-sources`.
    #[serde(default)]
    pub show_sources: bool,
    /// Base URL of the completion API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: ModelFlag::default(),
            default_provider: default_provider(),
            timeout: default_timeout(),
            max_file_size_mb: default_max_file_size_mb(),
            output_format: OutputFormat::default(),
            show_thinking_animation: true,
            log_level: LogLevel::default(),
            show_sources: false,
            base_url: default_base_url(),
        }
    }
}

fn default_provider() -> String {
    "perplexity".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_true() -> bool {
    true
}

/// Answer rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Styled answer rendered once the stream completes.
    #[default]
    Markdown,
    /// Raw text streamed to the terminal as it arrives.
    Plain,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" => Ok(OutputFormat::Markdown),
            "plain" => Ok(OutputFormat::Plain),
            other => Err(format!(
                "Invalid output_format '{}'. Must be one of [markdown, plain].",
                other
            )),
        }
    }
}

/// Log verbosity, spelled the way users write it in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!(
                "Invalid log_level '{}'. Must be one of [DEBUG, INFO, WARNING, ERROR, CRITICAL].",
                other
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, String> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("smart-term"))
            .context("Could not determine config directory")
    }

    /// Get the config file path, honouring `SMART_TERM_CONFIG`.
    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os("SMART_TERM_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Installation directory holding logs, credentials and helper scripts.
    pub fn install_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(".smart_term"))
            .context("Could not determine home directory")
    }

    /// Get the log file path.
    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::install_dir()?.join("logs").join("smart_term.log"))
    }

    /// Get the credential file path.
    pub fn credentials_path() -> Result<PathBuf> {
        Ok(Self::install_dir()?.join(".env"))
    }

    /// Load configuration from file and environment.
    ///
    /// Never fails: problems are reported as warnings on stderr and the
    /// affected settings fall back to their defaults.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                eprintln!("Warning: {}. Using default configuration.", e);
                Self::default()
            }
        };
        for warning in config.apply_env_overrides(|key| std::env::var(key).ok()) {
            eprintln!("Warning: {}", warning);
        }
        config
    }

    /// Load configuration from a specific file, using defaults if not found.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .and_then(|contents| {
                Self::from_toml_str(&contents)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))
            });
        match parsed {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using default configuration.", e);
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            anyhow::bail!("Invalid timeout value '0'. Must be a positive number.");
        }
        if self.max_file_size_mb == 0 {
            anyhow::bail!("Invalid max_file_size_mb value '0'. Must be a positive number.");
        }
        Ok(())
    }

    /// Apply `SMART_TERM_*` overrides. Returns a warning for every value
    /// that was present but unusable; such values are skipped.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(value) = lookup("SMART_TERM_MODEL") {
            match ModelFlag::from_name(&value) {
                Some(flag) => self.default_model = flag,
                None => warnings.push(format!("Ignoring SMART_TERM_MODEL='{}'", value)),
            }
        }
        if let Some(value) = lookup("SMART_TERM_TIMEOUT") {
            match value.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => self.timeout = seconds,
                _ => warnings.push(format!("Ignoring SMART_TERM_TIMEOUT='{}'", value)),
            }
        }
        if let Some(value) = lookup("SMART_TERM_MAX_FILE_SIZE_MB") {
            match value.trim().parse::<u64>() {
                Ok(mb) if mb > 0 => self.max_file_size_mb = mb,
                _ => warnings.push(format!("Ignoring SMART_TERM_MAX_FILE_SIZE_MB='{}'", value)),
            }
        }
        if let Some(value) = lookup("SMART_TERM_OUTPUT_FORMAT") {
            match value.parse() {
                Ok(format) => self.output_format = format,
                Err(e) => warnings.push(e),
            }
        }
        if let Some(value) = lookup("SMART_TERM_ANIMATION") {
            match parse_bool(&value) {
                Some(enabled) => self.show_thinking_animation = enabled,
                None => warnings.push(format!("Ignoring SMART_TERM_ANIMATION='{}'", value)),
            }
        }
        if let Some(value) = lookup("SMART_TERM_LOG_LEVEL") {
            match value.parse() {
                Ok(level) => self.log_level = level,
                Err(e) => warnings.push(e),
            }
        }
        if let Some(value) = lookup("SMART_TERM_SHOW_SOURCES") {
            match parse_bool(&value) {
                Some(show) => self.show_sources = show,
                None => warnings.push(format!("Ignoring SMART_TERM_SHOW_SOURCES='{}'", value)),
            }
        }
        if let Some(value) = lookup("SMART_TERM_BASE_URL") {
            if value.trim().is_empty() {
                warnings.push("Ignoring empty SMART_TERM_BASE_URL".to_string());
            } else {
                self.base_url = value.trim().to_string();
            }
        }

        warnings
    }

    /// Attachment ceiling in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_model, ModelFlag::Fast);
        assert_eq!(config.default_provider, "perplexity");
        assert_eq!(config.timeout, 30);
        assert_eq!(config.max_file_size_mb, 10);
        assert_eq!(config.output_format, OutputFormat::Markdown);
        assert!(config.show_thinking_animation);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.show_sources);
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
default_model = "sonar-pro"
timeout = 60
max_file_size_mb = 5
output_format = "plain"
show_thinking_animation = false
log_level = "debug"
some_future_key = "ignored"
"#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.default_model, ModelFlag::Pro);
        assert_eq!(config.timeout, 60);
        assert_eq!(config.max_file_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(config.output_format, OutputFormat::Plain);
        assert!(!config.show_thinking_animation);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_config_serialization_round_trips_log_level() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains(r#"log_level = "INFO""#));
        assert!(toml.contains(r#"default_model = "fast""#));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Config::from_toml_str("timeout = 0").is_err());
        assert!(Config::from_toml_str("max_file_size_mb = 0").is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        assert!(Config::from_toml_str(r#"log_level = "LOUD""#).is_err());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timeout = \"soon\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            Config::load_from(&dir.path().join("absent.toml")),
            Config::default()
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SMART_TERM_MODEL", "deep"),
            ("SMART_TERM_TIMEOUT", "90"),
            ("SMART_TERM_OUTPUT_FORMAT", "PLAIN"),
            ("SMART_TERM_ANIMATION", "off"),
            ("SMART_TERM_SHOW_SOURCES", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        let warnings = config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert!(warnings.is_empty());
        assert_eq!(config.default_model, ModelFlag::Deep);
        assert_eq!(config.timeout, 90);
        assert_eq!(config.output_format, OutputFormat::Plain);
        assert!(!config.show_thinking_animation);
        assert!(config.show_sources);
    }

    #[test]
    fn test_invalid_env_override_is_skipped() {
        let mut config = Config::default();
        let warnings = config.apply_env_overrides(|k| match k {
            "SMART_TERM_TIMEOUT" => Some("-3".to_string()),
            "SMART_TERM_MODEL" => Some("gpt".to_string()),
            _ => None,
        });
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.default_model, ModelFlag::Fast);
    }
}

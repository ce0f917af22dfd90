//! Configuration for the EcoSphere backend.
//!
//! Settings are layered: `ecosphere.toml` → environment → CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! cors_origins = ["http://localhost:3000"]
//!
//! [database]
//! path = "ecosphere.db"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [scheduler]
//! enabled = true
//!
//! [ai]
//! gemini_api_key = "..."
//! model = "gemini-pro"
//! timeout_secs = 30
//! ```
//!
//! Recognized environment variables: `ECOSPHERE_DB`, `ECOSPHERE_PORT`,
//! `GEMINI_API_KEY`. `RUST_LOG` overrides `logging.level` at subscriber
//! setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "ecosphere.toml";

/// Placeholder shipped in sample env files; treated as "no key".
const PLACEHOLDER_API_KEY: &str = "your-gemini-api-key-here";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcoToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub ai: AiSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ecosphere.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiSection {
    /// The configured key, unless empty or the sample placeholder.
    pub fn api_key(&self) -> Option<&str> {
        self.gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != PLACEHOLDER_API_KEY)
    }
}

impl EcoToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ecosphere.toml")
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply process environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("ECOSPHERE_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup("ECOSPHERE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("ECOSPHERE_PORT is not a valid port: {}", port))?;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.ai.gemini_api_key = Some(key);
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'ecosphere=debug'",
                self.logging.level
            ));
        }
        if self.ai.api_key().is_none() {
            warnings.push(
                "No Gemini API key configured; chatbot and news curation use fallback responses"
                    .to_string(),
            );
        }
        if self.ai.timeout_secs == 0 {
            warnings.push("ai.timeout_secs is 0; provider calls will time out immediately".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = EcoToml::default();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.database.path, PathBuf::from("ecosphere.db"));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.scheduler.enabled);
        assert!(cfg.ai.api_key().is_none());
    }

    #[test]
    fn test_parse_partial_file() {
        let cfg = EcoToml::parse(
            r#"
            [server]
            port = 9100

            [ai]
            gemini_api_key = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.ai.api_key(), Some("abc"));
        assert_eq!(cfg.ai.model, "gemini-pro");
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(EcoToml::parse("[server]\nport = \"eighty\"").is_err());
    }

    #[test]
    fn test_placeholder_key_is_ignored() {
        let mut cfg = EcoToml::default();
        cfg.ai.gemini_api_key = Some(PLACEHOLDER_API_KEY.into());
        assert!(cfg.ai.api_key().is_none());
        cfg.ai.gemini_api_key = Some("  ".into());
        assert!(cfg.ai.api_key().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ECOSPHERE_DB", "/tmp/eco.db"),
            ("ECOSPHERE_PORT", "8123"),
            ("GEMINI_API_KEY", "k"),
        ]
        .into_iter()
        .collect();
        let mut cfg = EcoToml::default();
        cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/eco.db"));
        assert_eq!(cfg.server.port, 8123);
        assert_eq!(cfg.ai.api_key(), Some("k"));
    }

    #[test]
    fn test_bad_port_env_is_an_error() {
        let mut cfg = EcoToml::default();
        let err = cfg
            .apply_env_from(|k| (k == "ECOSPHERE_PORT").then(|| "x".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("ECOSPHERE_PORT"));
    }

    #[test]
    fn test_load_or_default_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert_eq!(EcoToml::load_or_default(&path).unwrap().server.port, 8000);
        std::fs::write(&path, "[logging]\njson = true\n").unwrap();
        assert!(EcoToml::load_or_default(&path).unwrap().logging.json);
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut cfg = EcoToml::default();
        cfg.logging.level = "ecosphere=loud".into();
        cfg.ai.gemini_api_key = Some("key".into());
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("logging.level"));
    }
}

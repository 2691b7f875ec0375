//! tutor-ps configuration
//!
//! Tunables come from an optional TOML file; the binary's clap args
//! (port, database path, config path) override nothing here — they are
//! separate startup parameters.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Generator backend endpoints
///
/// The primary endpoint handles accuracy-sensitive calls (direction
/// analysis, problem generation, misconception diagnosis). The optional
/// helper endpoint handles fast, personality-driven calls (walkthroughs,
/// answer feedback) and falls back to the primary when unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub helper_base_url: Option<String>,
    pub helper_model: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            // Local Ollama OpenAI-compatible endpoint
            base_url: "http://localhost:11434/v1".to_string(),
            model: "gemma3:4b".to_string(),
            api_key: None,
            helper_base_url: None,
            helper_model: None,
            request_timeout_secs: 60,
        }
    }
}

/// Problem service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound for a single pipeline stage
    pub stage_timeout_secs: u64,
    /// Per-session event channel capacity
    pub event_capacity: usize,
    /// Recent-history dedup window size
    pub recent_window: i64,
    /// Maximum scaffold depth before remediation stops
    pub max_scaffold_level: i64,
    pub generator: GeneratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 90,
            event_capacity: 16,
            recent_window: 20,
            max_scaffold_level: 2,
            generator: GeneratorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or defaults when no path is
    /// given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
            }
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.recent_window, 20);
        assert_eq!(config.event_capacity, 16);
        assert!(config.stage_timeout() > Duration::from_secs(1));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutor-ps.toml");
        std::fs::write(&path, "recent_window = 5\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.recent_window, 5);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load(Some(missing.as_path())).is_err());
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            stage_timeout_secs = 5

            [generator]
            model = "gemini-2.5-flash"
            "#,
        )
        .unwrap();
        assert_eq!(config.stage_timeout_secs, 5);
        assert_eq!(config.generator.model, "gemini-2.5-flash");
        // Untouched fields keep defaults
        assert_eq!(config.recent_window, 20);
        assert_eq!(config.generator.base_url, "http://localhost:11434/v1");
    }
}

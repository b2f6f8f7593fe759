//! Deployment configuration for the cache worker and the update coordinator.
//!
//! Stored as JSON. Every field has a default so a partial file is valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// When an installed worker asks to be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    /// Stay waiting until the page sends SKIP_WAITING.
    #[default]
    AwaitConfirmation,
    /// Request skip-waiting as soon as install completes.
    Immediate,
}

/// What happens to a visible update prompt without user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PromptPolicy {
    /// The prompt stays until the user acts.
    #[default]
    Never,
    /// The prompt is dismissed after the delay.
    AutoDismiss { after_ms: u64 },
    /// The update is applied after the delay.
    AutoApply { after_ms: u64 },
}

impl PromptPolicy {
    /// Delay of the prompt timer, if this policy arms one.
    pub fn timer(&self) -> Option<Duration> {
        match *self {
            PromptPolicy::Never => None,
            PromptPolicy::AutoDismiss { after_ms } | PromptPolicy::AutoApply { after_ms } => {
                Some(Duration::from_millis(after_ms))
            }
        }
    }
}

/// Cache worker configuration for one deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache namespace prefix; the store is named `<prefix>-v<version>`.
    pub prefix: String,

    /// Deployed version.
    pub version: u64,

    /// Root-relative paths that must be cached before install completes.
    pub manifest: Vec<String>,

    /// Paths that are always fetched from the network and never stored.
    pub no_cache: Vec<String>,

    /// Activation policy after install.
    pub activation: ActivationPolicy,

    /// Take control of open pages on activation.
    pub claim_clients: bool,

    /// When this version was stamped by `pwacache bump`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<DateTime<Utc>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "pwa-cache".to_string(),
            version: 1,
            manifest: vec!["/".to_string(), "/index.html".to_string()],
            no_cache: vec!["/sw-update.js".to_string()],
            activation: ActivationPolicy::AwaitConfirmation,
            claim_clients: true,
            build_time: None,
        }
    }
}

impl CacheConfig {
    /// Name of the cache namespace for this version.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.prefix, self.version)
    }

    /// Check the configuration for structural errors.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::config("cache prefix must not be empty"));
        }
        for path in self.manifest.iter().chain(self.no_cache.iter()) {
            if !path.starts_with('/') {
                return Err(Error::config(format!(
                    "path {path:?} must be root-relative"
                )));
            }
        }
        if let Some(path) = self.manifest.iter().find(|p| self.no_cache.contains(p)) {
            return Err(Error::config(format!(
                "manifest entry {path:?} is excluded from caching"
            )));
        }
        Ok(())
    }
}

/// Update coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker script to register.
    pub script_url: String,

    /// Interval between background update checks.
    pub update_check_interval_ms: u64,

    /// Prompt timer policy.
    pub prompt: PromptPolicy,

    /// Grace delay before the fallback reload when no worker is waiting.
    pub fallback_reload_ms: u64,

    /// Cache-busting revision of the coordinator's own bootstrap script.
    pub bootstrap_revision: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            script_url: "/service-worker.js".to_string(),
            update_check_interval_ms: 60_000,
            prompt: PromptPolicy::Never,
            fallback_reload_ms: 1_000,
            bootstrap_revision: 1,
        }
    }
}

impl CoordinatorConfig {
    pub fn update_check_interval(&self) -> Duration {
        Duration::from_millis(self.update_check_interval_ms)
    }

    pub fn fallback_reload_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_reload_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_check_interval_ms == 0 {
            return Err(Error::config("update check interval must be non-zero"));
        }
        if !self.script_url.starts_with('/') {
            return Err(Error::config(format!(
                "script url {:?} must be root-relative",
                self.script_url
            )));
        }
        Ok(())
    }
}

/// Complete deployment configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub coordinator: CoordinatorConfig,
}

impl AppConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json_str(&contents)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.coordinator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.cache_name(), "pwa-cache-v1");
        assert_eq!(config.coordinator.update_check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AppConfig::from_json_str(
            r#"{"cache": {"prefix": "app", "version": 2, "manifest": ["/a.js", "/b.js"]}}"#,
        )
        .unwrap();

        assert_eq!(config.cache.cache_name(), "app-v2");
        assert_eq!(config.cache.manifest, vec!["/a.js", "/b.js"]);
        assert_eq!(config.cache.no_cache, vec!["/sw-update.js"]);
        assert_eq!(config.coordinator.prompt, PromptPolicy::Never);
    }

    #[test]
    fn test_prompt_policy_tagged_form() {
        let config = AppConfig::from_json_str(
            r#"{"coordinator": {"prompt": {"mode": "auto_apply", "after_ms": 10000}}}"#,
        )
        .unwrap();

        assert_eq!(
            config.coordinator.prompt,
            PromptPolicy::AutoApply { after_ms: 10_000 }
        );
        assert_eq!(
            config.coordinator.prompt.timer(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(PromptPolicy::Never.timer(), None);
    }

    #[test]
    fn test_excluded_manifest_entry_rejected() {
        let config = CacheConfig {
            manifest: vec!["/sw-update.js".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_relative_path_rejected() {
        let config = CacheConfig {
            manifest: vec!["app.js".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let json = r#"{"coordinator": {"update_check_interval_ms": 0}}"#;
        assert!(AppConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pwacache.json");

        let mut config = AppConfig::default();
        config.cache.version = 7;
        config.cache.build_time = Some(chrono::Utc::now());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/pwacache.json").unwrap_err();
        assert_eq!(err.category(), "config");
    }
}

pub mod env;

use crate::fallback::FallbackPolicy;
use crate::retry::RetryConfig;
use crate::types::Mode;
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use env::resolve_api_key;

/// Names of the built-in backends, in default priority order.
pub const BUILTIN_PROVIDERS: [&str; 4] = ["openrouter", "together", "huggingface", "replicate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub cooldown_secs: u64,
    pub max_attempts: u32,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        let policy = FallbackPolicy::default();
        Self {
            cooldown_secs: policy.cooldown.as_secs(),
            max_attempts: policy.max_attempts,
        }
    }
}

impl FallbackSettings {
    pub fn policy(&self) -> FallbackPolicy {
        FallbackPolicy {
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_attempts: self.max_attempts.max(1),
        }
    }
}

/// Per-backend overrides. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Takes precedence over environment variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Replaces the built-in candidate list for each listed mode.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<Mode, Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            base_url: None,
            api_key: None,
            models: BTreeMap::new(),
        }
    }
}

/// The configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fallback: FallbackSettings,
    /// provider name -> overrides. Missing entries use built-in defaults.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl RelayConfig {
    /// A config listing every built-in provider with its default priority,
    /// as written by `init-config`.
    pub fn with_builtin_providers() -> Self {
        let providers = BUILTIN_PROVIDERS
            .iter()
            .map(|name| {
                let settings = ProviderSettings {
                    priority: Some(default_priority(name)),
                    ..Default::default()
                };
                (name.to_string(), settings)
            })
            .collect();
        Self {
            providers,
            ..Default::default()
        }
    }

    pub fn provider(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    /// Reject values that cannot work at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_backoff_ms < self.retry.base_backoff_ms {
            anyhow::bail!(
                "retry.max_backoff_ms ({}) is below retry.base_backoff_ms ({})",
                self.retry.max_backoff_ms,
                self.retry.base_backoff_ms
            );
        }
        for (name, settings) in &self.providers {
            if let Some(base_url) = &settings.base_url {
                let parsed = url::Url::parse(base_url)
                    .with_context(|| format!("providers.{}.base_url is not a valid URL", name))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    anyhow::bail!("providers.{}.base_url must use http or https", name);
                }
            }
            for (mode, models) in &settings.models {
                if models.iter().any(|m| m.trim().is_empty()) {
                    anyhow::bail!("providers.{}.models.{} contains an empty model id", name, mode);
                }
            }
        }
        Ok(())
    }
}

/// Default priority for a built-in provider (lower is tried first).
pub fn default_priority(name: &str) -> i32 {
    BUILTIN_PROVIDERS
        .iter()
        .position(|p| *p == name)
        .map(|i| i as i32 + 1)
        .unwrap_or(100)
}

/// Reads and writes the config file with atomic replace + a sibling lock file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.chatrelay/config.json`
    pub fn default_path() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".chatrelay").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
            }
        }

        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;
        let out = f();
        let _ = FileExt::unlock(&lock_file);
        out
    }

    /// Load the config; a missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<RelayConfig> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no config file; using defaults");
            return Ok(RelayConfig::default());
        }
        self.with_exclusive_lock(|| {
            let content = fs::read_to_string(&self.path)
                .with_context(|| format!("reading {}", self.path.display()))?;
            let cfg: RelayConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", self.path.display()))?;
            cfg.validate()?;
            Ok(cfg)
        })
    }

    /// Write the config atomically (temp file, then rename).
    pub fn save(&self, config: &RelayConfig) -> anyhow::Result<()> {
        config.validate()?;
        self.with_exclusive_lock(|| {
            let json = serde_json::to_string_pretty(config)?;
            let tmp_path = self.path.with_extension("json.tmp");
            {
                let mut file = fs::File::create(&tmp_path)?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
            }
            // The file may hold API keys.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
            }
            fs::rename(&tmp_path, &self.path)?;
            tracing::info!(path = %self.path.display(), "config saved");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("config.json"));
        assert!(!manager.exists());
        assert_eq!(manager.load().unwrap(), RelayConfig::default());
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("nested").join("config.json"));

        let mut config = RelayConfig::with_builtin_providers();
        config.retry.max_retries = 4;
        config.fallback.cooldown_secs = 60;
        let together = config.providers.get_mut("together").unwrap();
        together.base_url = Some("http://localhost:9000/v1".into());
        together.models.insert(Mode::Code, vec!["my/coder".into()]);

        manager.save(&config).unwrap();
        assert!(manager.exists());
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"retry": {"max_retries": 5}, "providers": {"replicate": {"enabled": false}}}"#,
        )
        .unwrap();

        let config = ConfigManager::new(&path).load().unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_backoff_ms, 1_000);
        assert_eq!(config.fallback, FallbackSettings::default());
        assert!(!config.provider("replicate").enabled);
        assert!(config.provider("openrouter").enabled);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = RelayConfig::default();
        config.providers.insert(
            "openrouter".into(),
            ProviderSettings {
                base_url: Some("ftp://example.com".into()),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_priorities_follow_builtin_order() {
        assert_eq!(default_priority("openrouter"), 1);
        assert_eq!(default_priority("replicate"), 4);
        assert_eq!(default_priority("custom"), 100);
    }

    #[test]
    fn policy_from_settings() {
        let settings = FallbackSettings {
            cooldown_secs: 10,
            max_attempts: 0,
        };
        let policy = settings.policy();
        assert_eq!(policy.cooldown, Duration::from_secs(10));
        assert_eq!(policy.max_attempts, 1);
    }
}

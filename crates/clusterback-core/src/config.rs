//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with later sources
//! overriding earlier ones:
//! 1. Global config: `~/.config/clusterback/config.json` (or `.jsonc`)
//! 2. Environment variable: `CLUSTERBACK_CONFIG_CONTENT`
//! 3. Project config: `clusterback.json` or `clusterback.jsonc` in the
//!    working directory
//!
//! Files may contain `//` and `/* */` comments.

use crate::debounce::DEFAULT_MIN_INTERVAL;
use crate::error::{ConfigError, CoreResult};
use crate::resource::ResourceKind;
use crate::watch::DEFAULT_RESTART_BACKOFF;
use clusterback_store::CommitAuthor;
use clusterback_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "CLUSTERBACK_CONFIG_CONTENT";

/// Default HTTP listen address.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// JSON schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Directory of the git version store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    /// Resource kinds to capture and watch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<String>>,

    /// Minimum seconds between created versions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_interval_secs: Option<u64>,

    /// Seconds to wait before resubscribing to a closed change stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_backoff_secs: Option<u64>,

    /// kubectl invocation settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubectl: Option<KubectlConfig>,

    /// HTTP server settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Identity recorded on version commits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<CommitAuthor>,
}

/// kubectl invocation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubectlConfig {
    /// Path or name of the kubectl binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    /// Kubeconfig context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Kubeconfig file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
}

impl KubectlConfig {
    fn merge(self, other: Self) -> Self {
        Self {
            binary: merge_option(self.binary, other.binary),
            context: merge_option(self.context, other.context),
            kubeconfig: merge_option(self.kubeconfig, other.kubeconfig),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "config.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            config = config.merge(Self::parse_jsonc(&content, "<env>")?);
        }

        if let Some(dir) = project_dir {
            for name in &["clusterback.jsonc", "clusterback.json"] {
                let path = dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        config.validate()?;
        Ok((config, sources))
    }

    /// Get the global config directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        clusterback_util::path::config_dir()
    }

    /// Load configuration from a single file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Write this configuration as pretty JSON to `path`.
    pub async fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(self, other: Config) -> Config {
        Config {
            schema: merge_option(self.schema, other.schema),
            store_dir: merge_option(self.store_dir, other.store_dir),
            kinds: merge_option(self.kinds, other.kinds),
            min_interval_secs: merge_option(self.min_interval_secs, other.min_interval_secs),
            restart_backoff_secs: merge_option(
                self.restart_backoff_secs,
                other.restart_backoff_secs,
            ),
            kubectl: match (self.kubectl, other.kubectl) {
                (Some(base), Some(o)) => Some(base.merge(o)),
                (b, o) => o.or(b),
            },
            server: merge_option(self.server, other.server),
            log_level: merge_option(self.log_level, other.log_level),
            log_file: merge_option(self.log_file, other.log_file),
            commit_author: merge_option(self.commit_author, other.commit_author),
        }
    }

    /// Check values that would otherwise fail much later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(kinds) = &self.kinds {
            if kinds.is_empty() {
                return Err(ConfigError::Validation {
                    message: "kinds must not be empty".to_string(),
                });
            }
            if let Some(blank) = kinds.iter().find(|k| k.trim().is_empty()) {
                return Err(ConfigError::Validation {
                    message: format!("invalid kind {blank:?}"),
                });
            }
        }
        if let Some(level) = &self.log_level {
            if LogLevel::parse(level).is_none() {
                return Err(ConfigError::Validation {
                    message: format!("unknown log level {level:?}"),
                });
            }
        }
        Ok(())
    }

    /// Store directory, defaulting to the platform data directory.
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(clusterback_util::path::default_store_dir)
    }

    /// Configured kinds, or the default list.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        match &self.kinds {
            Some(kinds) => kinds.iter().map(|k| ResourceKind::new(k.trim())).collect(),
            None => ResourceKind::defaults(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MIN_INTERVAL)
    }

    pub fn restart_backoff(&self) -> Duration {
        self.restart_backoff_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RESTART_BACKOFF)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or_default()
    }

    pub fn server_address(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.address.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string())
    }

    pub fn commit_author(&self) -> CommitAuthor {
        self.commit_author.clone().unwrap_or_default()
    }

    /// Parse JSONC content.
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Strip `//` and `/* */` comments outside of strings.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    // Keep line numbers stable for parse errors.
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    other.or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // line comment
            "store_dir": "/tmp/x", // trailing
            /* block
               comment */
            "log_level": "de//bug/*not a comment*/"
        }"#;
        let result = strip_comments(input);
        assert!(!result.contains("line comment"));
        assert!(!result.contains("trailing"));
        assert!(!result.contains("block"));
        assert!(result.contains("de//bug/*not a comment*/"));
        assert_eq!(result.lines().count(), input.lines().count());
    }

    #[test]
    fn test_parse_jsonc() {
        let config = Config::parse_jsonc(
            r#"{
                // capture less often
                "min_interval_secs": 120,
                "kinds": ["deployments", "services"],
                "kubectl": {"context": "staging"}
            }"#,
            "test",
        )
        .unwrap();
        assert_eq!(config.min_interval(), Duration::from_secs(120));
        assert_eq!(
            config.kinds(),
            vec![ResourceKind::from("deployments"), ResourceKind::from("services")]
        );
        assert_eq!(
            config.kubectl.unwrap().context.as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Config::parse_jsonc(r#"{"min_intervl_secs": 5}"#, "test").unwrap_err();
        assert!(err.to_string().contains("invalid config at test"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.kinds().len(), 19);
        assert_eq!(config.min_interval(), Duration::from_secs(60));
        assert_eq!(config.restart_backoff(), Duration::from_secs(5));
        assert_eq!(config.server_address(), "127.0.0.1:8080");
        assert_eq!(config.log_level(), LogLevel::Info);
        assert_eq!(config.commit_author(), CommitAuthor::default());
    }

    #[test]
    fn test_merge_config() {
        let base = Config {
            min_interval_secs: Some(30),
            kubectl: Some(KubectlConfig {
                binary: Some("/usr/local/bin/kubectl".to_string()),
                context: Some("prod".to_string()),
                kubeconfig: None,
            }),
            ..Default::default()
        };
        let other = Config {
            min_interval_secs: Some(90),
            log_level: Some("debug".to_string()),
            log_file: Some(PathBuf::from("/var/log/clusterback.log")),
            kubectl: Some(KubectlConfig {
                context: Some("staging".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.min_interval_secs, Some(90));
        assert_eq!(merged.log_level(), LogLevel::Debug);
        assert_eq!(merged.log_file, Some(PathBuf::from("/var/log/clusterback.log")));
        let kubectl = merged.kubectl.unwrap();
        assert_eq!(kubectl.binary.as_deref(), Some("/usr/local/bin/kubectl"));
        assert_eq!(kubectl.context.as_deref(), Some("staging"));
    }

    #[test]
    fn test_validate() {
        let empty = Config {
            kinds: Some(vec![]),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let bad_level = Config {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusterback.json");
        let config = Config {
            store_dir: Some(PathBuf::from("/srv/snapshots")),
            restart_backoff_secs: Some(10),
            ..Default::default()
        };
        config.save(&path).await.unwrap();

        let loaded = Config::load_file(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.store_dir(), PathBuf::from("/srv/snapshots"));
        assert_eq!(loaded.restart_backoff(), Duration::from_secs(10));
    }
}

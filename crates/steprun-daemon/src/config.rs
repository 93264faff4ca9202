//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use steprun_core::HarnessConfig;

/// Environment variable holding the assistant API key
pub const API_KEY_ENV: &str = "STEPRUN_ASSIST_API_KEY";

/// Configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// Executions allowed to run at once; further requests wait their turn
    pub max_concurrent: usize,

    /// Harness configuration shared by every request
    pub harness: HarnessConfig,

    /// Chat-completions assistant; questions and autocorrect are off without it
    pub assistant: Option<AssistantConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: steprun_core::config::default_socket_path(),
            max_concurrent: 8,
            harness: HarnessConfig::default(),
            assistant: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("max_concurrent must be at least 1")]
    NoConcurrency,
}

impl DaemonConfig {
    /// Load configuration, layering the environment over the file.
    ///
    /// A missing `path` means defaults. `STEPRUN_SOCKET` wins over the
    /// file's socket path.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(socket) = std::env::var_os("STEPRUN_SOCKET") {
            config.socket_path = socket.into();
        }
        if let Some(assistant) = config.assistant.as_mut() {
            if assistant.api_key.is_none() {
                assistant.api_key = std::env::var(API_KEY_ENV).ok();
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    const fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        Ok(())
    }
}

/// OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Base URL; `/chat/completions` is appended
    pub base_url: String,

    pub model: String,

    /// Falls back to `STEPRUN_ASSIST_API_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai/v1".into(),
            model: "mistral-medium".into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl AssistantConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.max_concurrent, 8);
        assert!(config.assistant.is_none());
        assert_eq!(config.harness.run_timeout, Duration::from_secs(10));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
max_concurrent = 2

[harness]
run_timeout = 3
workspace_root = "/var/tmp/steprun"

[harness.toolchains]
python = "python3.12"

[assistant]
model = "small"
api_key = "from-file"
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.harness.run_timeout, Duration::from_secs(3));
        assert_eq!(config.harness.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.harness.toolchains.python, "python3.12");
        assert_eq!(config.harness.toolchains.cc, "gcc");

        let assistant = config.assistant.unwrap();
        assert_eq!(assistant.model, "small");
        assert_eq!(assistant.base_url, "https://api.mistral.ai/v1");
        assert_eq!(assistant.api_key.as_deref(), Some("from-file"));
        assert_eq!(assistant.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn unreadable_and_malformed_files_are_reported() {
        let err = DaemonConfig::from_file(Path::new("/nonexistent/steprun.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "max_concurrent = \"many\"").unwrap();
        let err = DaemonConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = DaemonConfig {
            max_concurrent: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoConcurrency)));
    }

    #[test]
    fn api_key_is_never_written_back() {
        let config = AssistantConfig {
            api_key: Some("secret".into()),
            ..AssistantConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
    }
}

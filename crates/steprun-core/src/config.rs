//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a harness instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory under which per-request workspaces are created
    pub workspace_root: PathBuf,

    /// Maximum wall-clock time for a compile step
    #[serde(with = "duration_secs")]
    pub compile_timeout: Duration,

    /// Maximum wall-clock time for a run step
    #[serde(with = "duration_secs")]
    pub run_timeout: Duration,

    /// Bytes kept per captured stream; the rest is discarded
    pub output_limit: usize,

    /// Toolchain allow-list
    pub toolchains: ToolchainConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            compile_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(10),
            output_limit: 1024 * 1024, // 1MB
            toolchains: ToolchainConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> HarnessConfigBuilder {
        HarnessConfigBuilder::default()
    }
}

/// Names of the only binaries the harness will ever spawn.
///
/// Each entry is either a bare name looked up on `PATH` or an absolute path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    pub python: String,
    pub cc: String,
    pub cxx: String,
    pub javac: String,
    pub java: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            cc: "gcc".into(),
            cxx: "g++".into(),
            javac: "javac".into(),
            java: "java".into(),
        }
    }
}

/// Builder for `HarnessConfig`
#[derive(Debug, Default)]
pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    #[must_use]
    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    #[must_use]
    pub const fn compile_timeout(mut self, duration: Duration) -> Self {
        self.config.compile_timeout = duration;
        self
    }

    #[must_use]
    pub const fn run_timeout(mut self, duration: Duration) -> Self {
        self.config.run_timeout = duration;
        self
    }

    #[must_use]
    pub const fn run_timeout_secs(self, secs: u64) -> Self {
        self.run_timeout(Duration::from_secs(secs))
    }

    #[must_use]
    pub const fn output_limit(mut self, bytes: usize) -> Self {
        self.config.output_limit = bytes;
        self
    }

    #[must_use]
    pub fn python(mut self, binary: impl Into<String>) -> Self {
        self.config.toolchains.python = binary.into();
        self
    }

    #[must_use]
    pub fn toolchains(mut self, toolchains: ToolchainConfig) -> Self {
        self.config.toolchains = toolchains;
        self
    }

    #[must_use]
    pub fn build(self) -> HarnessConfig {
        self.config
    }
}

/// Socket the daemon listens on and the CLI connects to
///
/// Returns:
/// - `$STEPRUN_SOCKET` if set (for development)
/// - `/run/steprun/steprun.sock` otherwise
#[must_use]
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("STEPRUN_SOCKET")
        .map_or_else(|| PathBuf::from("/run/steprun/steprun.sock"), PathBuf::from)
}

/// Durations are written as (possibly fractional) seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = HarnessConfig::builder()
            .workspace_root("/var/tmp/steprun")
            .run_timeout_secs(2)
            .output_limit(16)
            .python("/usr/bin/python3.12")
            .build();

        assert_eq!(config.workspace_root, PathBuf::from("/var/tmp/steprun"));
        assert_eq!(config.run_timeout, Duration::from_secs(2));
        assert_eq!(config.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.output_limit, 16);
        assert_eq!(config.toolchains.python, "/usr/bin/python3.12");
        assert_eq!(config.toolchains.cc, "gcc");
    }

    #[test]
    fn timeouts_deserialize_from_seconds() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{"run_timeout": 1.5, "toolchains": {"java": "java21"}}"#)
                .unwrap();
        assert_eq!(config.run_timeout, Duration::from_millis(1500));
        assert_eq!(config.toolchains.java, "java21");
        assert_eq!(config.toolchains.javac, "javac");
    }
}

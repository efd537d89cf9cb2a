use crate::bytes::ByteSize;
use crate::guard::{GuardBuilder, DEFAULT_INTERVAL, DEFAULT_STATS_FREQUENCY};
use crate::Guard;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from memguard.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct MemguardConfig {
    pub guard: GuardConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Name used in log lines instead of the pid.
    pub name: Option<String>,
    /// Memory ceiling, e.g. `"512MiB"` or a plain byte count.
    pub limit: Option<ByteSize>,
    pub interval_ms: u64,
    pub stats_secs: u64,
    /// Fire the kill notice on breach but leave the process alive.
    pub alert_only: bool,
    /// Kill the child's whole process group rather than just the child.
    pub kill_group: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CommandConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            name: None,
            limit: None,
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            stats_secs: DEFAULT_STATS_FREQUENCY.as_secs(),
            alert_only: false,
            kill_group: true,
        }
    }
}

impl GuardConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stats_frequency(&self) -> Duration {
        Duration::from_secs(self.stats_secs)
    }

    /// A guard builder carrying these settings; the caller supplies the process.
    pub fn builder(&self) -> GuardBuilder {
        let mut builder = Guard::builder()
            .interval(self.interval())
            .stats_frequency(self.stats_frequency())
            .enforce(!self.alert_only);
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        builder
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A field has a value memguard cannot run with.
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl MemguardConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the settings needed to start a guard and return the limit in bytes.
    pub fn validate(&self) -> Result<u64, ConfigError> {
        if self.guard.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "guard.interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        match self.guard.limit {
            None => Err(ConfigError::Invalid {
                field: "guard.limit",
                reason: "no memory limit given (use --limit or guard.limit)".to_string(),
            }),
            Some(ByteSize(0)) => Err(ConfigError::Invalid {
                field: "guard.limit",
                reason: "must be greater than zero".to_string(),
            }),
            Some(limit) => Ok(limit.as_u64()),
        }
    }
}

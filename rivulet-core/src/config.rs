use crate::error::ConfigError;
use crate::ops::{DEFAULT_FLAT_MAP_CONCURRENCY, DEFAULT_FLAT_MAP_PREFETCH, DEFAULT_PUBLISH_PREFETCH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime tuning for pipelines, the verifier and the CLI
///
/// Every section is optional in YAML; missing keys take their defaults.
///
/// ```yaml
/// flat_map:
///   concurrency: 16
/// logging:
///   level: debug
///   format: json
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FlowConfig {
    pub flat_map: FlatMapConfig,
    pub publish: PublishConfig,
    pub verifier: VerifierConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatMapConfig {
    /// Inner sources subscribed at once
    pub concurrency: u64,
    /// Items requested from each inner source up front
    pub prefetch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub prefetch: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads of the runtime driving real-time schedulers
    pub timer_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for FlatMapConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FLAT_MAP_CONCURRENCY,
            prefetch: DEFAULT_FLAT_MAP_PREFETCH,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PUBLISH_PREFETCH,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { timer_threads: 2 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl VerifierConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("flat_map.concurrency", self.flat_map.concurrency),
            ("flat_map.prefetch", self.flat_map.prefetch),
            ("publish.prefetch", self.publish.prefetch),
            ("runtime.timer_threads", self.runtime.timer_threads as u64),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", key)));
            }
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format must be `pretty` or `json`, got `{}`",
                other
            ))),
        }
    }

    pub fn with_flat_map(mut self, concurrency: u64, prefetch: u64) -> Self {
        self.flat_map = FlatMapConfig {
            concurrency,
            prefetch,
        };
        self
    }

    pub fn with_publish_prefetch(mut self, prefetch: u64) -> Self {
        self.publish.prefetch = prefetch;
        self
    }

    pub fn with_verifier_timeout(mut self, timeout: Duration) -> Self {
        self.verifier.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_timer_threads(mut self, threads: usize) -> Self {
        self.runtime.timer_threads = threads;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: impl Into<String>) -> Self {
        self.logging.format = format.into();
        self
    }
}

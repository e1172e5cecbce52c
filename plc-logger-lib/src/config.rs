use crate::error::LoggerError;
use crate::sink::WritePolicy;
use crate::tag::TagSpec;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default EtherNet/IP TCP port.
pub const DEFAULT_PORT: u16 = 44818;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// The logger configuration as loaded from JSON.
///
/// Mode-specific fields stay optional here; [`Trigger::from_config`]
/// decides which of them are required.
///
/// [`Trigger::from_config`]: crate::trigger::Trigger::from_config
#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    pub ip: String,
    pub tags: Vec<TagSpec>,
    pub headers: Vec<String>,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_tag: Option<String>,
    /// Minimum seconds between periodic samples.
    #[serde(default)]
    pub period_time: Option<f64>,
    #[serde(default)]
    pub compare_condition: Option<String>,
    #[serde(default)]
    pub compare_cutoff: Option<f64>,
    #[serde(deserialize_with = "bool_or_int")]
    pub print_timestamp: bool,
    #[serde(default)]
    pub live_update: bool,

    #[serde(default = "default_port")]
    pub port: u16,
    /// Backplane slot of the processor.
    #[serde(default)]
    pub slot: u8,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Sleep between loop iterations; 0 keeps the loop busy.
    #[serde(default)]
    pub poll_interval_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

impl LoggerConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoggerError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LoggerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoggerError> {
        let config: LoggerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.ip.trim().is_empty() {
            return Err(LoggerError::Config("ip must not be empty".to_string()));
        }
        if self.tags.is_empty() {
            return Err(LoggerError::Config("at least one tag is required".to_string()));
        }
        if let Some(tag) = self.tags.iter().find(|t| t.name.trim().is_empty()) {
            return Err(LoggerError::Config(format!("empty tag name in {:?}", tag)));
        }
        if self.headers.len() != self.tags.len() {
            return Err(LoggerError::Config(format!(
                "{} headers given for {} tags",
                self.headers.len(),
                self.tags.len()
            )));
        }
        Ok(())
    }

    pub fn write_policy(&self) -> WritePolicy {
        if self.live_update {
            WritePolicy::Live
        } else {
            WritePolicy::Batched
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Rejects output paths that do not carry the `csv` extension.
pub fn validate_output_path(path: &Path) -> Result<(), LoggerError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(()),
        _ => Err(LoggerError::Config(format!(
            "output file must be csv, got {}",
            path.display()
        ))),
    }
}

//! Retry, polling and deadline configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::bank::DeviceClass;
use crate::error::UpdateError;

/// Per-class polling deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Deadline for power supplies
    #[serde(rename = "psu_secs", with = "duration_secs")]
    pub psu: Duration,

    /// Deadline for management controllers
    #[serde(rename = "bmc_secs", with = "duration_secs")]
    pub bmc: Duration,

    /// Deadline for expanders
    #[serde(rename = "expander_secs", with = "duration_secs")]
    pub expander: Duration,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            psu: Duration::from_secs(600),
            bmc: Duration::from_secs(1800),
            expander: Duration::from_secs(900),
        }
    }
}

/// Configuration for [`crate::orchestrator::UpdateOrchestrator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Push attempts before giving up (at least 1)
    pub push_attempts: u32,

    /// Delay between push attempts
    #[serde(rename = "push_retry_delay_secs", with = "duration_secs")]
    pub push_retry_delay: Duration,

    /// Wait after initiating an update before the first status query
    #[serde(rename = "initial_poll_delay_secs", with = "duration_secs")]
    pub initial_poll_delay: Duration,

    /// Interval between status queries
    #[serde(rename = "poll_interval_secs", with = "duration_secs")]
    pub poll_interval: Duration,

    /// Longest wait for a push, an update command or the post-update bank
    /// read to answer
    #[serde(rename = "command_timeout_secs", with = "duration_secs")]
    pub command_timeout: Duration,

    /// Per-class polling deadlines
    pub deadlines: DeadlineConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            push_attempts: 3,
            push_retry_delay: Duration::from_secs(5),
            initial_poll_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            deadlines: DeadlineConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Polling deadline for a device class
    pub fn deadline_for(&self, class: DeviceClass) -> Duration {
        match class {
            DeviceClass::Psu => self.deadlines.psu,
            DeviceClass::Bmc => self.deadlines.bmc,
            DeviceClass::Expander => self.deadlines.expander,
        }
    }

    /// Reject values that would make an attempt meaningless or unbounded
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.push_attempts == 0 {
            return Err(UpdateError::InvalidConfig(
                "push_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(UpdateError::InvalidConfig(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(UpdateError::InvalidConfig(
                "command_timeout_secs must be greater than 0".to_string(),
            ));
        }
        for class in [DeviceClass::Psu, DeviceClass::Bmc, DeviceClass::Expander] {
            if self.deadline_for(class).is_zero() {
                return Err(UpdateError::InvalidConfig(format!(
                    "deadline for {class} must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self, UpdateError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(s: &str) -> Result<Self, UpdateError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        if is_json(path) {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }
}

/// Whether a path names a JSON document (anything else is read as YAML)
pub fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Serialize a [`Duration`] as whole seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize as seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    /// Deserialize from seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

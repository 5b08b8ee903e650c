//! Runtime configuration. Every field has a serde default so partial
//! configuration files work.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Per-slot scope lock timeout.
    #[serde(default = "default_access_timeout", with = "duration_ms")]
    pub access_timeout: Duration,

    /// Timeout around one reasoning-collaborator call.
    #[serde(default = "default_reason_timeout", with = "duration_ms")]
    pub reason_timeout: Duration,

    /// Upper bound on enhancement-layer replays of one call.
    #[serde(default = "default_max_call_attempts")]
    pub max_call_attempts: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            access_timeout: default_access_timeout(),
            reason_timeout: default_reason_timeout(),
            max_call_attempts: default_max_call_attempts(),
        }
    }
}

fn default_access_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reason_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_call_attempts() -> u32 {
    3
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.context.access_timeout, Duration::from_secs(5));
        assert_eq!(config.context.max_call_attempts, 3);
    }

    #[test]
    fn test_partial_override() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"access_timeout": 250, "max_call_attempts": 1}"#).unwrap();
        assert_eq!(config.access_timeout, Duration::from_millis(250));
        assert_eq!(config.max_call_attempts, 1);
        assert_eq!(config.reason_timeout, Duration::from_secs(60));
    }
}

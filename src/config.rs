use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, RuntimeResult};

/// Runner-wide settings. Every field has a default so a partial JSON file
/// (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Capacity of the shared queue all event sources fan into.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Capacity of each process's private inbound queue. A full queue drops
    /// the newest event.
    #[serde(default = "default_process_queue_size")]
    pub process_queue_size: usize,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Verbose lookup errors list every visible definition.
    #[serde(default)]
    pub debug: bool,

    /// Template for `Logger::url`; `{run_id}` is substituted.
    #[serde(default)]
    pub log_url: Option<String>,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial", with = "duration_ms")]
    pub initial: Duration,

    #[serde(default = "default_backoff_max", with = "duration_ms")]
    pub max: Duration,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            process_queue_size: default_process_queue_size(),
            shutdown_timeout: default_shutdown_timeout(),
            debug: false,
            log_url: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> RuntimeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::not_found(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

fn default_event_buffer_size() -> usize {
    1024
}

fn default_process_queue_size() -> usize {
    1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_initial() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> u32 {
    2
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
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"process_queue_size": 4, "shutdown_timeout": 1500}"#).unwrap();
        assert_eq!(config.process_queue_size, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.event_buffer_size, 1024);
        assert_eq!(config.backoff, BackoffConfig::default());
        assert!(!config.debug);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"debug": true, "backoff": {{"initial": 5}}}}"#).unwrap();
        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert!(config.debug);
        assert_eq!(config.backoff.initial, Duration::from_millis(5));
        assert_eq!(config.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = RunnerConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(err.is_not_found());
    }
}

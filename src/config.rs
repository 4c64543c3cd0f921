use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use snafu::ResultExt;

use crate::error::{ApplicationError, ConfigLoadSnafu};
use crate::model::LECTURE_NOTIFICATION_OFFSET;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,

    /// How often to look for weekly reminders that are missing from the queue. `0s` turns it off.
    #[serde(default = "default_reconcile_interval", deserialize_with = "human_duration")]
    pub reconcile_interval: Duration,
    #[serde(default = "default_max_poll_interval", deserialize_with = "human_duration")]
    pub max_poll_interval: Duration,

    #[serde(default = "default_lecture_offset")]
    pub lecture_notification_offset: i64,
}

impl Config {
    pub fn reconcile_every(&self) -> Option<Duration> {
        Some(self.reconcile_interval).filter(|interval| !interval.is_zero())
    }
}

pub fn load() -> Result<Config, ApplicationError> {
    envy::from_env::<Config>().context(ConfigLoadSnafu)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("planner.json")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("reminders.json")
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_max_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_lecture_offset() -> i64 {
    LECTURE_NOTIFICATION_OFFSET
}

fn human_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, envy::Error> {
        envy::from_iter(vars.iter().map(|(key, value)| (key.to_string(), value.to_string())))
    }

    #[test]
    fn everything_has_a_default() {
        let config = config(&[]).unwrap();

        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.store_path, PathBuf::from("planner.json"));
        assert_eq!(config.queue_path, PathBuf::from("reminders.json"));
        assert_eq!(config.reconcile_every(), Some(Duration::from_secs(900)));
        assert_eq!(config.max_poll_interval, Duration::from_secs(60));
        assert_eq!(config.lecture_notification_offset, 10_000);
    }

    #[test]
    fn durations_are_human_readable() {
        let config = config(&[("RECONCILE_INTERVAL", "1h 30m"), ("MAX_POLL_INTERVAL", "5s")]).unwrap();
        assert_eq!(config.reconcile_interval, Duration::from_secs(90 * 60));
        assert_eq!(config.max_poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_disables_reconciliation() {
        let config = config(&[("RECONCILE_INTERVAL", "0s")]).unwrap();
        assert_eq!(config.reconcile_every(), None);
    }

    #[test]
    fn nonsense_is_rejected() {
        assert!(config(&[("MAX_POLL_INTERVAL", "soon")]).is_err());
        assert!(config(&[("LECTURE_NOTIFICATION_OFFSET", "lots")]).is_err());
    }
}

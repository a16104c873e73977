use std::collections::HashMap;
use std::env;
use std::time::Duration;

use fieldsync_core::SyncConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub journal_db_path: String,
    pub entity_db_path: String,
    pub retry_ceiling: u32,
    pub sweep_interval: Duration,
    pub apply_timeout: Duration,
    pub processing_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FIELDSYNC_BIND_ADDR", "127.0.0.1:8080");
        let journal_db_path =
            value_or_default(&lookup, "FIELDSYNC_JOURNAL_DB_PATH", "fieldsync-journal.db");
        let entity_db_path =
            value_or_default(&lookup, "FIELDSYNC_ENTITY_DB_PATH", "fieldsync-entities.db");

        let retry_ceiling = parse_in_range(&lookup, "FIELDSYNC_RETRY_CEILING", 3, 1, 10)?;
        let sweep_interval_ms =
            parse_in_range(&lookup, "FIELDSYNC_SWEEP_INTERVAL_MS", 1_000, 100, 60_000)?;
        let apply_timeout_secs =
            parse_in_range(&lookup, "FIELDSYNC_APPLY_TIMEOUT_SECS", 30, 1, 300)?;
        let processing_timeout_secs =
            parse_in_range(&lookup, "FIELDSYNC_PROCESSING_TIMEOUT_SECS", 300, 10, 3_600)?;

        Ok(Self {
            bind_addr,
            journal_db_path,
            entity_db_path,
            retry_ceiling,
            sweep_interval: Duration::from_millis(u64::from(sweep_interval_ms)),
            apply_timeout: Duration::from_secs(u64::from(apply_timeout_secs)),
            processing_timeout: Duration::from_secs(u64::from(processing_timeout_secs)),
        })
    }

    /// The engine tunables derived from this server configuration
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_retry_ceiling(self.retry_ceiling)
            .with_sweep_interval(self.sweep_interval)
            .with_apply_timeout(self.apply_timeout)
            .with_processing_timeout(self.processing_timeout)
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })?,
        None => default,
    };
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults() {
        let config = from_map(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.apply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("FIELDSYNC_RETRY_CEILING", "0");
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_RETRY_CEILING"));

        let mut map = HashMap::new();
        map.insert("FIELDSYNC_SWEEP_INTERVAL_MS", "not-a-number");
        assert!(from_map(&map).is_err());
    }

    #[test]
    fn config_feeds_the_engine() {
        let mut map = HashMap::new();
        map.insert("FIELDSYNC_RETRY_CEILING", "5");
        map.insert("FIELDSYNC_SWEEP_INTERVAL_MS", "250");

        let sync = from_map(&map).unwrap().sync_config();
        assert_eq!(sync.retry_ceiling, 5);
        assert_eq!(sync.sweep_interval, Duration::from_millis(250));
    }
}

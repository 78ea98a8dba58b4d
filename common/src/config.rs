// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub nats: NatsSettings,
    pub trigger: TriggerSettings,
    pub worker: WorkerSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsSettings {
    pub url: String,
    pub stream_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// How often the trigger sweep runs (in seconds)
    pub tick_interval_seconds: u64,
    /// How often the schedule cache is refreshed (in seconds)
    pub cache_refresh_interval_seconds: u64,
    /// Bounded wait for the shared schedule mutex (in milliseconds)
    pub mutex_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Consumer group identifier shared by worker replicas
    pub group_id: String,
    /// Replay retained messages on first subscription instead of only new ones
    #[serde(default)]
    pub from_beginning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.stream_name.is_empty() {
            return Err("NATS stream_name cannot be empty".to_string());
        }

        if self.trigger.tick_interval_seconds == 0 {
            return Err("Trigger tick_interval_seconds must be greater than 0".to_string());
        }
        if self.trigger.cache_refresh_interval_seconds == 0 {
            return Err("Trigger cache_refresh_interval_seconds must be greater than 0".to_string());
        }
        if self.trigger.mutex_wait_ms == 0 {
            return Err("Trigger mutex_wait_ms must be greater than 0".to_string());
        }

        if self.worker.group_id.is_empty() {
            return Err("Worker group_id cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/sentinel".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                stream_name: "DISPATCH".to_string(),
            },
            trigger: TriggerSettings {
                tick_interval_seconds: 10,
                cache_refresh_interval_seconds: 60,
                mutex_wait_ms: 10_000,
            },
            worker: WorkerSettings {
                group_id: "sentinel-workers".to_string(),
                from_beginning: false,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_tick_interval() {
        let mut settings = Settings::default();
        settings.trigger.tick_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_group_id() {
        let mut settings = Settings::default();
        settings.worker.group_id = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_cadence_matches_the_service() {
        let settings = Settings::default();
        // Cache refresh runs every minute, the sweep every ten seconds, and
        // the mutex wait is bounded at ten seconds.
        assert_eq!(settings.trigger.cache_refresh_interval_seconds, 60);
        assert_eq!(settings.trigger.tick_interval_seconds, 10);
        assert_eq!(settings.trigger.mutex_wait_ms, 10_000);
    }
}

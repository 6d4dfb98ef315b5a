use crate::classification::ClassificationTable;
use crate::error::ConfigError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration, loaded from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub influxdb: InfluxDbConfig,
    pub twins: TwinsConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Model type → fields that are telemetry
    #[serde(default)]
    pub classification: ClassificationTable,
}

/// Connection settings for the InfluxDB v2 telemetry store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfluxDbConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Connection settings for the Azure Digital Twins instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TwinsConfig {
    #[serde(default)]
    pub url: String,
    /// Pre-issued bearer token
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Reconciliation pass settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationConfig {
    /// Model identifiers whose twins are reconciled
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_warmup_seconds")]
    pub warmup_seconds: u64,
    /// How far back the telemetry alignment looks
    #[serde(default = "default_lookback_seconds")]
    pub lookback_seconds: u64,
    /// Width of each aggregation bucket
    #[serde(default = "default_bucket_seconds")]
    pub bucket_seconds: u64,
    /// How far back to look for the latest value of each property
    #[serde(default = "default_property_lookback_hours")]
    pub property_lookback_hours: u64,
    /// Devices reconciled at the same time within a pass
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_api_version() -> String {
    "2023-10-31".to_string()
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_warmup_seconds() -> u64 {
    10
}

fn default_lookback_seconds() -> u64 {
    300
}

fn default_bucket_seconds() -> u64 {
    60
}

fn default_property_lookback_hours() -> u64 {
    24
}

fn default_concurrency() -> usize {
    4
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            interval_seconds: default_interval_seconds(),
            warmup_seconds: default_warmup_seconds(),
            lookback_seconds: default_lookback_seconds(),
            bucket_seconds: default_bucket_seconds(),
            property_lookback_hours: default_property_lookback_hours(),
            concurrency: default_concurrency(),
        }
    }
}

impl ReplicationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_seconds)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_seconds)
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_seconds)
    }

    pub fn property_lookback(&self) -> Duration {
        Duration::from_secs(self.property_lookback_hours * 3600)
    }
}

/// Environment variables that override values from the file
pub const ENV_INFLUXDB_URL: &str = "REPLICATOR_INFLUXDB_URL";
pub const ENV_INFLUXDB_TOKEN: &str = "REPLICATOR_INFLUXDB_TOKEN";
pub const ENV_TWINS_URL: &str = "REPLICATOR_TWINS_URL";
pub const ENV_TWINS_TOKEN: &str = "REPLICATOR_TWINS_TOKEN";

impl Config {
    /// Load, override from the environment, and validate
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml_str(&text)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        for model in config.unclassified_models() {
            warn!(
                "Model {} has no classification entry; all of its fields are ignored",
                model
            );
        }

        info!(
            "Loaded configuration from {}: {} model(s), {} classified model type(s)",
            path.display(),
            config.replication.models.len(),
            config.classification.model_count()
        );
        Ok(config)
    }

    /// Parse configuration text without validating it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Replace endpoint and credential values with any overrides present
    ///
    /// `lookup` resolves a variable name; `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets: [(&str, &mut String); 4] = [
            (ENV_INFLUXDB_URL, &mut self.influxdb.url),
            (ENV_INFLUXDB_TOKEN, &mut self.influxdb.token),
            (ENV_TWINS_URL, &mut self.twins.url),
            (ENV_TWINS_TOKEN, &mut self.twins.token),
        ];

        for (name, target) in targets {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                debug!("Overriding configuration from {}", name);
                *target = value;
            }
        }
    }

    /// Replicated models the classification table does not know
    ///
    /// Every observation of such a model is ignored, so its twins never
    /// receive updates.
    pub fn unclassified_models(&self) -> Vec<&str> {
        self.replication
            .models
            .iter()
            .map(String::as_str)
            .filter(|model| !self.classification.knows_model(model))
            .collect()
    }

    /// Check that every required value is present and sane
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("influxdb.url", &self.influxdb.url),
            ("influxdb.org", &self.influxdb.org),
            ("influxdb.bucket", &self.influxdb.bucket),
            ("twins.url", &self.twins.url),
            ("twins.api_version", &self.twins.api_version),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "missing required setting {}",
                    name
                )));
            }
        }

        let replication = &self.replication;
        if replication.models.is_empty() {
            return Err(ConfigError::ValidationError(
                "replication.models must name at least one model".to_string(),
            ));
        }
        if let Some(model) = replication
            .models
            .iter()
            .find(|m| m.trim().is_empty() || m.contains('\''))
        {
            return Err(ConfigError::ValidationError(format!(
                "invalid model identifier '{}'",
                model
            )));
        }

        let positive = [
            ("replication.interval_seconds", replication.interval_seconds),
            ("replication.lookback_seconds", replication.lookback_seconds),
            ("replication.bucket_seconds", replication.bucket_seconds),
            (
                "replication.property_lookback_hours",
                replication.property_lookback_hours,
            ),
            ("replication.concurrency", replication.concurrency as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if replication.bucket_seconds > replication.lookback_seconds {
            return Err(ConfigError::ValidationError(format!(
                "replication.bucket_seconds ({}) exceeds replication.lookback_seconds ({})",
                replication.bucket_seconds, replication.lookback_seconds
            )));
        }

        Ok(())
    }
}

//! Configuration for the registry, its store backend and recovery.
//!
//! Recognized options (JSON keys, or flat property keys with an optional
//! `events.` prefix):
//!
//! | Property                               | Default  |
//! |----------------------------------------|----------|
//! | `completion-mode`                      | `UPDATE` |
//! | `republish-on-restart`                 | `false`  |
//! | `republish-on-restart.lock-name`       | none     |
//! | `republish-on-restart.lock-timeout`    | `10s`    |
//! | `republish-on-restart.lease-ttl`       | `60s`    |
//! | `schema-initialization.enabled`        | `false`  |
//! | `failed-attempt-limit`                 | none     |
//!
//! `lock-timeout` bounds how long an instance waits for the recovery lock.
//! `lease-ttl` is how long a held lease survives without renewal; recovery
//! renews it before every record, so it only has to outlast the slowest
//! single delivery. Very large durations mean "wait forever" and "never
//! expire" respectively.
//!
//! Environment variables use the `EVENTS_` prefix with the key upper-cased
//! and separators replaced by `_`, e.g. `EVENTS_REPUBLISH_ON_RESTART_LOCK_NAME`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::lock::DEFAULT_LEASE_TTL;
use crate::publication::CompletionMode;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const PROPERTY_PREFIX: &str = "events.";

const ENV_KEYS: &[(&str, &str)] = &[
    ("EVENTS_COMPLETION_MODE", "completion-mode"),
    ("EVENTS_REPUBLISH_ON_RESTART", "republish-on-restart"),
    ("EVENTS_REPUBLISH_ON_RESTART_ENABLED", "republish-on-restart.enabled"),
    ("EVENTS_REPUBLISH_ON_RESTART_LOCK_NAME", "republish-on-restart.lock-name"),
    ("EVENTS_REPUBLISH_ON_RESTART_LOCK_TIMEOUT", "republish-on-restart.lock-timeout"),
    ("EVENTS_REPUBLISH_ON_RESTART_LEASE_TTL", "republish-on-restart.lease-ttl"),
    ("EVENTS_SCHEMA_INITIALIZATION_ENABLED", "schema-initialization.enabled"),
    ("EVENTS_FAILED_ATTEMPT_LIMIT", "failed-attempt-limit"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown configuration key `{0}`")]
    UnknownKey(String),
    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EventsConfig {
    pub completion_mode: CompletionMode,
    pub republish_on_restart: RepublishConfig,
    pub schema_initialization: SchemaInitialization,
    pub failed_attempt_limit: Option<usize>,
}

/// `republish-on-restart`: either a plain boolean or an object carrying the
/// lock settings of the exclusive variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "RepublishSetting")]
pub struct RepublishConfig {
    pub enabled: bool,
    pub lock_name: Option<String>,
    #[serde(serialize_with = "serialize_duration")]
    pub lock_timeout: Duration,
    #[serde(serialize_with = "serialize_duration")]
    pub lease_ttl: Duration,
}

impl Default for RepublishConfig {
    fn default() -> Self {
        RepublishConfig {
            enabled: false,
            lock_name: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RepublishSetting {
    Flag(bool),
    Detailed(RepublishDetails),
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RepublishDetails {
    enabled: bool,
    lock_name: Option<String>,
    #[serde(deserialize_with = "deserialize_duration")]
    lock_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    lease_ttl: Duration,
}

impl Default for RepublishDetails {
    fn default() -> Self {
        let defaults = RepublishConfig::default();
        RepublishDetails {
            enabled: defaults.enabled,
            lock_name: defaults.lock_name,
            lock_timeout: defaults.lock_timeout,
            lease_ttl: defaults.lease_ttl,
        }
    }
}

impl From<RepublishSetting> for RepublishConfig {
    fn from(setting: RepublishSetting) -> Self {
        match setting {
            RepublishSetting::Flag(enabled) => RepublishConfig {
                enabled,
                ..RepublishConfig::default()
            },
            RepublishSetting::Detailed(details) => RepublishConfig {
                enabled: details.enabled,
                lock_name: details.lock_name.filter(|name| !name.trim().is_empty()),
                lock_timeout: details.lock_timeout,
                lease_ttl: details.lease_ttl,
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaInitialization {
    pub enabled: bool,
}

/// Settings consumed by store backends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub completion_mode: CompletionMode,
    pub schema_initialization: bool,
    pub failed_attempt_limit: Option<usize>,
}

/// Settings consumed by the recovery processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// A lock name selects the exclusive variant.
    pub lock_name: Option<String>,
    pub lock_timeout: Duration,
    /// Lifetime of an unrenewed recovery lease.
    pub lease_ttl: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let republish = RepublishConfig::default();
        RecoveryConfig {
            enabled: republish.enabled,
            lock_name: republish.lock_name,
            lock_timeout: republish.lock_timeout,
            lease_ttl: republish.lease_ttl,
        }
    }
}

impl EventsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build from flat `key = value` pairs, e.g. loaded from a properties
    /// file. Keys may carry an `events.` prefix.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = EventsConfig::default();
        for (key, value) in properties {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Load from the process environment. See [`from_env_vars`](Self::from_env_vars).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_vars(std::env::vars())
    }

    /// Build from `EVENTS_*` variables. Other variables are ignored.
    pub fn from_env_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let properties = vars.into_iter().filter_map(|(name, value)| {
            ENV_KEYS
                .iter()
                .find(|(env, _)| *env == name)
                .map(|(_, key)| (*key, value))
        });
        Self::from_properties(properties)
    }

    fn apply(&mut self, raw_key: &str, raw_value: &str) -> Result<(), ConfigError> {
        let key = raw_key.trim();
        let key = key.strip_prefix(PROPERTY_PREFIX).unwrap_or(key);
        let value = raw_value.trim();

        match key {
            "completion-mode" => {
                self.completion_mode = value
                    .parse()
                    .map_err(|e: crate::publication::UnknownCompletionMode| {
                        ConfigError::invalid(key, value, e.to_string())
                    })?;
            }
            "republish-on-restart" | "republish-on-restart.enabled" => {
                self.republish_on_restart.enabled = parse_bool(key, value)?;
            }
            "republish-on-restart.lock-name" => {
                self.republish_on_restart.lock_name =
                    (!value.is_empty()).then(|| value.to_string());
            }
            "republish-on-restart.lock-timeout" => {
                self.republish_on_restart.lock_timeout = parse_duration(value)
                    .map_err(|reason| ConfigError::invalid(key, value, reason))?;
            }
            "republish-on-restart.lease-ttl" => {
                self.republish_on_restart.lease_ttl = parse_duration(value)
                    .map_err(|reason| ConfigError::invalid(key, value, reason))?;
            }
            "schema-initialization.enabled" => {
                self.schema_initialization.enabled = parse_bool(key, value)?;
            }
            "failed-attempt-limit" => {
                self.failed_attempt_limit = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|e: std::num::ParseIntError| {
                        ConfigError::invalid(key, value, e.to_string())
                    })?)
                };
            }
            _ => return Err(ConfigError::UnknownKey(raw_key.to_string())),
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            completion_mode: self.completion_mode,
            schema_initialization: self.schema_initialization.enabled,
            failed_attempt_limit: self.failed_attempt_limit,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            enabled: self.republish_on_restart.enabled,
            lock_name: self.republish_on_restart.lock_name.clone(),
            lock_timeout: self.republish_on_restart.lock_timeout,
            lease_ttl: self.republish_on_restart.lease_ttl,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected `true` or `false`")),
    }
}

/// Parse `250ms`, `5s`, `2m` or a bare number of milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (digits, millis_per_unit) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else {
        (value, 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_millis(n.saturating_mul(millis_per_unit)))
        .map_err(|_| format!("`{value}` is not a duration (use ms, s or m)"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

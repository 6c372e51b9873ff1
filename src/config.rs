use config::{Config, Environment, File, FileFormat, Source};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RespectfulError, Result};

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "respectful.config.yml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "RESPECTFUL_CONFIG";

/// Process-wide settings, resolved once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    /// Default headroom for realms registered without their own threshold
    pub safety_threshold: u64,
}

/// Connection parameters for the shared counter store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    /// Logical Redis database. Accepts an integer or a numeric string, since
    /// Redis only addresses databases by index.
    #[serde(deserialize_with = "deserialize_namespace")]
    pub namespace: u32,
    pub key_prefix: String,
    pub connection_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl StoreSettings {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.namespace)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                host: "localhost".to_string(),
                port: 6379,
                namespace: 0,
                key_prefix: "respectful".to_string(),
                connection_timeout_secs: 5,
                command_timeout_secs: 1,
            },
            safety_threshold: 0,
        }
    }
}

impl Settings {
    /// Load settings from `RESPECTFUL_CONFIG`, or from `respectful.config.yml`
    /// in the working directory if it exists.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// Load settings from an explicit file, which must exist, or fall back to
    /// the optional default file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_source(File::from(path).required(true)),
            None => Self::from_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        }
    }

    /// Parse settings from a YAML document layered over the defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_source(File::from_str(yaml, FileFormat::Yaml))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let defaults = Settings::default();

        let settings: Settings = Config::builder()
            .set_default("store.host", defaults.store.host)
            .and_then(|b| b.set_default("store.port", i64::from(defaults.store.port)))
            .and_then(|b| b.set_default("store.namespace", i64::from(defaults.store.namespace)))
            .and_then(|b| b.set_default("store.key_prefix", defaults.store.key_prefix))
            .and_then(|b| {
                b.set_default(
                    "store.connection_timeout_secs",
                    defaults.store.connection_timeout_secs as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "store.command_timeout_secs",
                    defaults.store.command_timeout_secs as i64,
                )
            })
            .and_then(|b| b.set_default("safety_threshold", defaults.safety_threshold as i64))
            .map_err(config_error)?
            .add_source(source)
            .add_source(
                Environment::with_prefix("RESPECTFUL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.store.host.trim().is_empty() {
            return Err(RespectfulError::Config("'store.host' must not be empty".to_string()));
        }
        if self.store.port == 0 {
            return Err(RespectfulError::Config("'store.port' must not be 0".to_string()));
        }
        if self.store.key_prefix.is_empty() || self.store.key_prefix.contains(char::is_whitespace) {
            return Err(RespectfulError::Config(
                "'store.key_prefix' must be non-empty and contain no whitespace".to_string(),
            ));
        }
        if self.store.command_timeout_secs == 0 || self.store.connection_timeout_secs == 0 {
            return Err(RespectfulError::Config("store timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

fn deserialize_namespace<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Namespace {
        Index(u32),
        Name(String),
    }

    match Namespace::deserialize(deserializer)? {
        Namespace::Index(index) => Ok(index),
        Namespace::Name(name) => name.trim().parse().map_err(|_| {
            de::Error::custom(format!(
                "store.namespace must be a Redis database index, got '{}'",
                name
            ))
        }),
    }
}

fn config_error(e: config::ConfigError) -> RespectfulError {
    RespectfulError::Config(e.to_string())
}

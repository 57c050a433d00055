//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment
//! variables. Example configuration files can be found in the `configs/`
//! directory located in the repository root.

use std::{fmt, net::SocketAddr, path::Path, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationErrors};

/// An error related to loading and validation of settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically
/// named settings field.
#[derive(Debug, Validate, Deserialize)]
pub struct Settings {
    #[validate]
    pub network: NetworkSettings,
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation
    /// failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("addshare").separator("__"))?;
        config.try_into()
    }
}

/// Network settings.
#[derive(Debug, Validate, Deserialize)]
pub struct NetworkSettings {
    /// The address the message endpoint binds to. The port doubles as this
    /// participant's id.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [network]
    /// bind_address = "127.0.0.1:4001"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// ADDSHARE_NETWORK__BIND_ADDRESS=127.0.0.1:4001
    /// ```
    pub bind_address: SocketAddr,

    /// The host all protocol peers are reachable on.
    pub coordinator_host: String,

    /// The port of the coordinator's message endpoint.
    pub coordinator_port: u16,

    /// The total number of delivery attempts per message.
    #[validate(range(min = 1))]
    pub retry_attempts: usize,
}

/// Round ledger settings.
#[derive(Debug, Deserialize)]
pub struct LedgerSettings {
    /// The path of this node's round ledger CSV file.
    pub path: PathBuf,
}

/// Settings for the encrypted-update variant.
#[derive(Debug, Default, Deserialize)]
pub struct EncryptionSettings {
    /// The path of a JSON file holding the coordinator's public key. When
    /// set, partial sums are sealed to this key before submission.
    pub coordinator_public_key: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    /// A comma-separated list of logging directives.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

pub(crate) fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

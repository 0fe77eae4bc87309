use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ::config::{Config, Environment, File, FileFormat};
use pubcast_error::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{
    logging::LoggingConfig,
    subscribe::SubscriberConfig,
    transport::{
        tcp::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PEER_QUEUE_CAPACITY},
        TcpPublisherConfig, TcpSubscriberConfig, DEFAULT_ADDRESS, DEFAULT_PORT,
    },
};

/// Переменная окружения с путём к файлу настроек.
pub const CONFIG_PATH_ENV: &str = "PUBCAST_CONFIG";
/// Префикс переменных окружения; вложенность через `__`.
pub const ENV_PREFIX: &str = "PUBCAST";

const DEFAULT_CONFIG_FILE: &str = "pubcast.toml";

/// Все настройки процесса.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub publisher: PublisherSettings,
    pub subscriber: SubscriberSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublisherSettings {
    pub port: u16,
    pub peer_queue_capacity: usize,
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubscriberSettings {
    pub address: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub max_frame_size: usize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Загружает настройки.
    ///
    /// Порядок источников, каждый следующий перекрывает предыдущий:
    /// значения по умолчанию, файл из `PUBCAST_CONFIG` (обязателен, если
    /// переменная задана) или `pubcast.toml` (если есть), переменные
    /// `PUBCAST_SECTION__KEY`.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Some(Path::new(&path))),
            None => Self::load_from(None),
        }
    }

    /// Как [`Settings::load`], но с явным путём к файлу.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(PathBuf::from(path))
                .format(FileFormat::Toml)
                .required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigError::Load {
                reason: e.to_string(),
            })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.publisher.validate()?;
        self.subscriber.validate()?;
        self.logging.validate()
    }
}

impl PublisherSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.peer_queue_capacity == 0 {
            return Err(invalid("publisher.peer_queue_capacity", "must be positive"));
        }
        if self.max_frame_size == 0 {
            return Err(invalid("publisher.max_frame_size", "must be positive"));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TcpPublisherConfig {
        TcpPublisherConfig {
            peer_queue_capacity: self.peer_queue_capacity,
            max_frame_size: self.max_frame_size,
        }
    }
}

impl SubscriberSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(invalid("subscriber.address", "must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("subscriber.poll_interval_ms", "must be positive"));
        }
        if self.max_frame_size == 0 {
            return Err(invalid("subscriber.max_frame_size", "must be positive"));
        }
        Ok(())
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            tcp: TcpSubscriberConfig {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
                max_frame_size: self.max_frame_size,
            },
        }
    }
}

fn invalid(
    field: &str,
    reason: &str,
) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Значения по умолчанию
////////////////////////////////////////////////////////////////////////////////

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            peer_queue_capacity: DEFAULT_PEER_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            poll_interval_ms: 1000,
            connect_timeout_ms: 5000,
            reconnect_interval_ms: 500,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

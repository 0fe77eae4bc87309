use std::path::PathBuf;

use pubcast_error::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::Level;

/// Формат вывода логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Многострочный, для разработки
    Pretty,
    /// Однострочный
    #[default]
    Compact,
    /// JSON, по объекту на строку
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error
    pub level: String,
    /// Дополнительные директивы `EnvFilter`, например `pubcast::transport=trace`
    pub directives: Vec<String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

/// Вывод в консоль (stdout).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
}

/// Вывод в файл с ежедневной ротацией.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Каталог для файлов логов
    pub dir: PathBuf,
    /// Префикс имени файла; к нему дописывается дата
    pub prefix: String,
}

impl LoggingConfig {
    /// Директива для `EnvFilter`: базовый уровень плюс дополнительные
    /// директивы через запятую.
    pub fn filter_directive(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level
            .parse::<Level>()
            .map_err(|_| ConfigError::Invalid {
                field: "logging.level".to_string(),
                reason: format!("unknown level '{}'", self.level),
            })?;

        if self.file.enabled && self.file.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.file.prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            dir: PathBuf::from("logs"),
            prefix: "pubcast.log".to_string(),
        }
    }
}

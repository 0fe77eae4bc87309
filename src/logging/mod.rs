//! Логирование на `tracing`: фильтр уровней, консоль и файл с ежедневной
//! ротацией.

pub mod config;
mod filters;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use pubcast_error::BoxError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Устанавливает глобальный subscriber по конфигурации.
///
/// Возвращённый handle нужно держать до конца работы процесса.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingHandle, BoxError> {
    config.validate()?;

    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer(&config.console));
    }

    let file_guard = if config.file.enabled {
        let (layer, guard) = sinks::file::layer(&config.file)?;
        layers.push(layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filters::build_filter(&config))
        .with(layers)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        console = config.console.enabled,
        file = config.file.enabled,
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

use std::fs;

use pubcast_error::ConfigError;
use tracing::Subscriber;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::registry::LookupSpan;

use super::{fmt_layer, BoxedLayer};
use crate::logging::config::FileConfig;

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Возвращённый guard должен жить, пока нужны логи: при его drop
/// оставшиеся записи сбрасываются на диск.
pub fn layer<S>(config: &FileConfig) -> Result<(BoxedLayer<S>, WorkerGuard), ConfigError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(&config.dir).map_err(|e| ConfigError::Invalid {
        field: "logging.file.dir".to_string(),
        reason: format!("cannot create '{}': {e}", config.dir.display()),
    })?;

    let appender = rolling::daily(&config.dir, &config.prefix);
    let (writer, guard) = non_blocking(appender);

    Ok((fmt_layer(config.format, writer, false), guard))
}

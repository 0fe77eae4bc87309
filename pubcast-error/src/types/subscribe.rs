use std::any::Any;

use thiserror::Error;

use crate::{BoxError, ErrorExt, StatusCode, TransportError};

/// Ошибки регистрации callback-а у подписчика.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Топик пустой или содержит пробельные символы.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
    /// Подписчик уже остановлен.
    #[error("subscriber is stopped")]
    Stopped,
    /// Транспорт не принял подписку.
    #[error("failed to subscribe: {0}")]
    Subscribe(#[from] TransportError),
}

/// Ошибка, возникшая внутри пользовательского callback-а.
///
/// Никогда не выходит за пределы точки диспетчеризации: логируется
/// и учитывается в статистике.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Callback вернул ошибку.
    #[error("callback for topic '{topic}' failed: {source}")]
    Failed {
        topic: String,
        #[source]
        source: BoxError,
    },
    /// Callback запаниковал.
    #[error("callback for topic '{topic}' panicked: {message}")]
    Panicked { topic: String, message: String },
}

impl CallbackError {
    /// Топик сообщения, на котором упал callback.
    pub fn topic(&self) -> &str {
        match self {
            Self::Failed { topic, .. } | Self::Panicked { topic, .. } => topic,
        }
    }
}

impl ErrorExt for RegistrationError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTopic { .. } => StatusCode::InvalidArgs,
            Self::Stopped => StatusCode::Stopped,
            Self::Subscribe(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for CallbackError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed { .. } => StatusCode::CallbackFailed,
            Self::Panicked { .. } => StatusCode::CallbackPanicked,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "callback".to_string()),
            ("status_code", self.status_code().to_string()),
            ("topic", self.topic().to_string()),
        ]
    }
}

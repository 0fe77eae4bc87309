use std::any::Any;

use thiserror::Error;

use crate::{DecodeError, ErrorExt, StatusCode, TransportError};

/// Ошибки публикации события.
#[derive(Debug, Error)]
pub enum PublishError {
    /// У события нет поля `name`.
    #[error("event has no 'name' field")]
    MissingName,
    /// Поле `name` нельзя использовать как топик.
    #[error("invalid event name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    /// Событие не удалось сериализовать.
    #[error(transparent)]
    Encode(#[from] DecodeError),
    /// Ошибка транспорта при отправке.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingName | Self::InvalidName { .. } => StatusCode::InvalidArgs,
            Self::Encode(e) => e.status_code(),
            Self::Transport(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

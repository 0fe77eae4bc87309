use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора транспортного фрейма `<topic> <body>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Во фрейме нет пробела между топиком и телом.
    #[error("frame has no separator between topic and body")]
    MissingSeparator,
    /// Фрейм начинается с разделителя.
    #[error("frame topic is empty")]
    EmptyTopic,
    /// Топик не является корректным UTF-8.
    #[error("frame topic is not valid UTF-8: {reason}")]
    InvalidTopic { reason: String },
    /// В теле bulk-фрейма нет разделителя после id публикации.
    #[error("bulk frame has no publication id")]
    MissingPublicationId,
    /// Id публикации не является десятичным `u32`.
    #[error("bulk frame has invalid publication id '{value}'")]
    InvalidPublicationId { value: String },
}

/// Ошибки разбора структурированного (JSON) тела обычного фрейма.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Тело не является корректным JSON.
    #[error("malformed event body: {reason}")]
    Malformed { reason: String },
    /// JSON корректен, но это не объект.
    #[error("event body must be a JSON object, got {kind}")]
    NotAnObject { kind: String },
    /// Не удалось сериализовать событие.
    #[error("failed to serialize event: {reason}")]
    Encode { reason: String },
}

/// Любая ошибка декодирования входящего фрейма.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ErrorExt for FramingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSeparator | Self::EmptyTopic | Self::MissingPublicationId => {
                StatusCode::InvalidFrame
            }
            Self::InvalidTopic { .. } => StatusCode::InvalidUtf8,
            Self::InvalidPublicationId { .. } => StatusCode::InvalidInteger,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for DecodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed { .. } => StatusCode::DecodingError,
            Self::NotAnObject { .. } => StatusCode::TypeError,
            Self::Encode { .. } => StatusCode::EncodingError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for FrameError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Framing(e) => e.status_code(),
            Self::Decode(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_error_display() {
        assert_eq!(
            FramingError::MissingSeparator.to_string(),
            "frame has no separator between topic and body"
        );
        assert_eq!(
            FramingError::InvalidPublicationId {
                value: "x1".into()
            }
            .to_string(),
            "bulk frame has invalid publication id 'x1'"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            FramingError::MissingSeparator.status_code(),
            StatusCode::InvalidFrame
        );
        assert_eq!(
            DecodeError::NotAnObject {
                kind: "array".into()
            }
            .status_code(),
            StatusCode::TypeError
        );
        assert!(DecodeError::Malformed {
            reason: "eof".into()
        }
        .status_code()
        .is_protocol_error());
    }
}

use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспортного уровня (bind/connect/send/receive).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Не удалось занять порт публикатора.
    #[error("failed to bind port {port}: {reason}")]
    Bind { port: u16, reason: String },
    /// Не удалось подключиться к публикатору.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// Подключение не уложилось в таймаут.
    #[error("connection to {endpoint} timed out")]
    ConnectTimeout { endpoint: String },
    /// Ошибка отправки фрейма.
    #[error("send failed: {reason}")]
    Send { reason: String },
    /// Ошибка получения фрейма.
    #[error("receive failed: {reason}")]
    Receive { reason: String },
    /// Фрейм больше допустимого размера.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    /// Транспорт закрыт и больше не может использоваться.
    #[error("transport is closed")]
    Closed,
    /// Низкоуровневая ошибка ввода-вывода.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Ошибка, после которой продолжать работу с транспортом бессмысленно.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Bind { .. })
    }
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { .. } => StatusCode::BindFailed,
            Self::Connect { .. } => StatusCode::ConnectionFailed,
            Self::ConnectTimeout { .. } => StatusCode::Timeout,
            Self::Send { .. } | Self::Receive { .. } | Self::Io(_) => StatusCode::Io,
            Self::FrameTooLarge { .. } => StatusCode::SizeLimit,
            Self::Closed => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::Connect { endpoint, .. } | Self::ConnectTimeout { endpoint } => {
                tags.push(("endpoint", endpoint.clone()));
            }
            Self::Bind { port, .. } => {
                tags.push(("port", port.to_string()));
            }
            _ => {}
        }

        tags
    }
}

//! Транспорт: доставка фреймов от одного публикатора многим подписчикам.
//!
//! - `tcp`: TCP-транспорт с фильтрацией подписок на стороне публикатора.
//! - `memory`: внутрипроцессный хаб поверх `tokio::sync::broadcast`.
//!
//! Модуль описывает только границу: отправка фрейма, подписка на префикс
//! топика и ожидание следующего фрейма с таймаутом.

pub mod memory;
pub mod tcp;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use pubcast_error::TransportError;

pub use memory::{MemoryHub, MemoryPublisher};
pub use tcp::{TcpConnector, TcpPublisher, TcpPublisherConfig, TcpSubscriberConfig};

/// Порт публикатора по умолчанию.
pub const DEFAULT_PORT: u16 = 10133;
/// Адрес публикатора по умолчанию для подписчика.
pub const DEFAULT_ADDRESS: &str = "localhost";

/// Адрес публикатора, к которому подключается подписчик.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

/// Отправляющая сторона транспорта (сокет публикатора).
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Отправляет один фрейм всем подходящим подписчикам.
    async fn send(
        &self,
        frame: Bytes,
    ) -> Result<(), TransportError>;
}

/// Управление подписками на стороне подписчика.
///
/// Может вызываться из любого потока параллельно с циклом приёма.
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    /// Подписывается на все фреймы, топик которых начинается с `prefix`.
    /// Пустой префикс означает все топики.
    async fn subscribe(
        &self,
        prefix: &[u8],
    ) -> Result<(), TransportError>;

    /// Установлено ли сейчас соединение с публикатором.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Источник входящих фреймов. Принадлежит только циклу приёма.
#[async_trait]
pub trait FrameSource: Send {
    /// Ждёт следующий фрейм не дольше `timeout`.
    ///
    /// `Ok(None)` означает, что за отведённое время ничего не пришло.
    async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, TransportError>;
}

/// Подключение подписчика: общая часть для подписок и источник фреймов.
pub struct SubscriberConnection {
    pub control: Arc<dyn SubscriptionControl>,
    pub source: Box<dyn FrameSource>,
}

/// Фабрика подключений подписчиков, используется пулом.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<SubscriberConnection, TransportError>;
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Endpoint {
    pub fn new(
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Подставляет значения по умолчанию для отсутствующих частей.
    pub fn resolve(
        address: Option<&str>,
        port: Option<u16>,
    ) -> Self {
        Self::new(
            address.unwrap_or(DEFAULT_ADDRESS),
            port.unwrap_or(DEFAULT_PORT),
        )
    }

    /// Строка `host:port` для `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.address, self.port)
    }
}

/// Подходит ли фрейм хотя бы под один префикс подписки.
pub(crate) fn matches_any(
    prefixes: &[Bytes],
    frame: &[u8],
) -> bool {
    prefixes.iter().any(|prefix| frame.starts_with(prefix))
}

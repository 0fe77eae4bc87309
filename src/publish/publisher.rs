use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use pubcast_error::{PublishError, TransportError};
use serde_json::Value;
use tracing::{debug, trace};

use super::PublicationSequencer;
use crate::{
    protocol::{encode_bulk, encode_normal, is_bulk_topic, Event, BULK_FIELD, ID_FIELD, NAME_FIELD},
    transport::{FrameSink, TcpPublisher, TcpPublisherConfig},
};

/// Публикатор событий.
///
/// Каждой публикации присваивает id, кодирует событие во фрейм и отправляет
/// его в транспорт. Bulk-данные уходят отдельным вторым фреймом с тем же id.
pub struct Publisher {
    /// Сокет публикатора
    transport: Arc<dyn FrameSink>,
    /// Генератор id публикаций
    sequencer: PublicationSequencer,
    /// Фактический адрес, если публикатор слушает TCP
    local_addr: Option<SocketAddr>,
    stats: PublisherStats,
}

/// Счётчики публикатора.
#[derive(Debug, Default)]
pub struct PublisherStats {
    /// Успешно отправленные события
    pub published: AtomicU64,
    /// Успешно отправленные bulk-фреймы
    pub bulk_published: AtomicU64,
    /// Публикации, завершившиеся ошибкой
    pub failed: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Publisher {
    /// Занимает TCP-порт на всех интерфейсах.
    pub async fn bind(
        port: u16,
        config: TcpPublisherConfig,
    ) -> Result<Self, TransportError> {
        let socket = TcpPublisher::bind(port, config).await?;
        let local_addr = socket.local_addr();

        let mut publisher = Self::with_transport(Arc::new(socket));
        publisher.local_addr = Some(local_addr);
        Ok(publisher)
    }

    /// Публикатор поверх произвольного транспорта.
    pub fn with_transport(transport: Arc<dyn FrameSink>) -> Self {
        Self::with_sequencer(transport, PublicationSequencer::new())
    }

    pub fn with_sequencer(
        transport: Arc<dyn FrameSink>,
        sequencer: PublicationSequencer,
    ) -> Self {
        Self {
            transport,
            sequencer,
            local_addr: None,
            stats: PublisherStats::default(),
        }
    }

    /// Публикует событие и, если передан `bulk`, его bulk-компаньон.
    ///
    /// Поле `id` события перезаписывается присвоенным id, при наличии `bulk`
    /// выставляется `bulk: true`. Id берётся до проверки имени, так что
    /// неудачная публикация тоже расходует id. Повторных попыток нет.
    pub async fn publish(
        &self,
        event: &mut Event,
        bulk: Option<&[u8]>,
    ) -> Result<u32, PublishError> {
        let pub_id = self.sequencer.next();

        let result = self.publish_with_id(pub_id, event, bulk).await;
        if result.is_err() {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        result.map(|()| pub_id)
    }

    async fn publish_with_id(
        &self,
        pub_id: u32,
        event: &mut Event,
        bulk: Option<&[u8]>,
    ) -> Result<(), PublishError> {
        let topic = validate_name(event)?;

        event.insert(ID_FIELD, pub_id);
        if bulk.is_some() {
            event.insert(BULK_FIELD, true);
        }

        let frame = encode_normal(&topic, event)?;
        self.transport.send(frame).await?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        trace!(%topic, pub_id, "event published");

        // Между двумя фреймами нет атомарности: событие уже ушло, даже если
        // bulk отправить не удастся.
        if let Some(bulk) = bulk {
            let frame = encode_bulk(&topic, pub_id, bulk);
            self.transport.send(frame).await?;
            self.stats.bulk_published.fetch_add(1, Ordering::Relaxed);
            trace!(%topic, pub_id, size = bulk.len(), "bulk published");
        }

        Ok(())
    }

    pub fn sequencer(&self) -> &PublicationSequencer {
        &self.sequencer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        debug!(
            published = self.stats.published.load(Ordering::Relaxed),
            "publisher closed"
        );
    }
}

/// Достаёт из события топик и проверяет, что его можно поставить в начало
/// фрейма.
fn validate_name(event: &Event) -> Result<String, PublishError> {
    let value = event.get(NAME_FIELD).ok_or(PublishError::MissingName)?;

    let invalid = |name: &str, reason: &str| PublishError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let name = match value {
        Value::String(name) => name.as_str(),
        other => return Err(invalid(&other.to_string(), "name must be a string")),
    };

    if name.is_empty() {
        return Err(invalid(name, "name must not be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid(name, "name must not contain whitespace"));
    }
    if is_bulk_topic(name.as_bytes()) {
        return Err(invalid(name, "name must not end with 'bulk'"));
    }

    Ok(name.to_string())
}

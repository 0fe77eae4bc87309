use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use pubcast_error::TransportError;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, warn};

use super::{
    matches_any, Connector, Endpoint, FrameSink, FrameSource, SubscriberConnection,
    SubscriptionControl,
};

/// Ёмкость буфера каждого `broadcast::channel` по умолчанию.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Внутрипроцессный транспорт.
///
/// Каждый «порт» это отдельный `broadcast`-канал. Канал создаётся при первом
/// обращении с любой стороны, поэтому подписчик может подключиться раньше,
/// чем публикатор займёт порт. Подписки фильтруются на стороне подписчика.
#[derive(Clone)]
pub struct MemoryHub {
    /// Порт → `Sender`
    channels: Arc<DashMap<u16, broadcast::Sender<Bytes>>>,
    /// Порты, занятые публикаторами
    bound: Arc<DashSet<u16>>,
    /// Ёмкость буфера каждого канала
    capacity: usize,
}

/// Публикатор, занявший порт хаба. Освобождает порт при `Drop`.
pub struct MemoryPublisher {
    port: u16,
    tx: broadcast::Sender<Bytes>,
    bound: Arc<DashSet<u16>>,
}

struct MemoryControl {
    prefixes: Arc<RwLock<Vec<Bytes>>>,
}

struct MemorySource {
    rx: broadcast::Receiver<Bytes>,
    prefixes: Arc<RwLock<Vec<Bytes>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            bound: Arc::new(DashSet::new()),
            capacity,
        }
    }

    /// Занимает порт. Повторный `bind` того же порта это ошибка, пока
    /// предыдущий публикатор жив.
    pub fn bind(
        &self,
        port: u16,
    ) -> Result<MemoryPublisher, TransportError> {
        if !self.bound.insert(port) {
            return Err(TransportError::Bind {
                port,
                reason: "address already in use".to_string(),
            });
        }

        debug!(port, "memory publisher bound");

        Ok(MemoryPublisher {
            port,
            tx: self.channel(port),
            bound: self.bound.clone(),
        })
    }

    /// Подключается к порту без ожидания публикатора.
    pub fn connect_port(
        &self,
        port: u16,
    ) -> SubscriberConnection {
        let prefixes = Arc::new(RwLock::new(Vec::new()));
        let rx = self.channel(port).subscribe();

        SubscriberConnection {
            control: Arc::new(MemoryControl {
                prefixes: prefixes.clone(),
            }),
            source: Box::new(MemorySource { rx, prefixes }),
        }
    }

    /// Количество подписчиков, подключённых к порту.
    pub fn receiver_count(
        &self,
        port: u16,
    ) -> usize {
        self.channels
            .get(&port)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn channel(
        &self,
        port: u16,
    ) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(port)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl MemoryPublisher {
    pub fn port(&self) -> u16 {
        self.port
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация транспортных трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl Drop for MemoryPublisher {
    fn drop(&mut self) {
        self.bound.remove(&self.port);
    }
}

#[async_trait]
impl FrameSink for MemoryPublisher {
    async fn send(
        &self,
        frame: Bytes,
    ) -> Result<(), TransportError> {
        // Нет подписчиков: фрейм просто теряется, как у любого PUB-сокета.
        let _ = self.tx.send(frame);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionControl for MemoryControl {
    async fn subscribe(
        &self,
        prefix: &[u8],
    ) -> Result<(), TransportError> {
        let mut prefixes = self.prefixes.write();
        if !prefixes.iter().any(|p| p.as_ref() == prefix) {
            prefixes.push(Bytes::copy_from_slice(prefix));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(frame)) => {
                    if matches_any(&self.prefixes.read(), &frame) {
                        return Ok(Some(frame));
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, "memory subscriber lagged, frames dropped");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::Closed);
                }
            }
        }
    }
}

#[async_trait]
impl Connector for MemoryHub {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<SubscriberConnection, TransportError> {
        Ok(self.connect_port(endpoint.port))
    }
}

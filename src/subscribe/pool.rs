use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use pubcast_error::TransportError;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::{Subscriber, SubscriberConfig};
use crate::transport::{Connector, Endpoint, TcpConnector};

/// Ячейка пула для одного адреса. Её лок держится на время подключения.
type Slot = Arc<AsyncMutex<Option<Arc<Subscriber>>>>;

/// Пул подписчиков: одно подключение на каждый адрес публикатора.
///
/// Подписчик создаётся при первом обращении к адресу и переиспользуется
/// дальше. Остановленный подписчик при следующем обращении заменяется
/// новым. [`SubscriberPool::close_all`] нужно вызвать один раз при
/// завершении процесса.
pub struct SubscriberPool {
    connector: Arc<dyn Connector>,
    config: SubscriberConfig,
    slots: Mutex<HashMap<Endpoint, Slot>>,
}

impl SubscriberPool {
    /// Пул TCP-подписчиков.
    pub fn new(config: SubscriberConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.tcp.clone()));
        Self::with_connector(connector, config)
    }

    pub fn with_connector(
        connector: Arc<dyn Connector>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            connector,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Возвращает подписчика для адреса, создавая его при необходимости.
    ///
    /// `None` заменяется значениями по умолчанию, поэтому `None` и
    /// `Some("localhost")` дают одного и того же подписчика.
    pub async fn get(
        &self,
        address: Option<&str>,
        port: Option<u16>,
    ) -> Result<Arc<Subscriber>, TransportError> {
        let endpoint = Endpoint::resolve(address, port);
        let slot = self.slot(&endpoint);

        // Параллельные первые обращения к одному адресу ждут друг друга на
        // его ячейке и получают одного подписчика; другие адреса не ждут.
        let mut current = slot.lock().await;
        if let Some(subscriber) = current.as_ref() {
            if subscriber.is_running() {
                return Ok(subscriber.clone());
            }
            debug!(%endpoint, "replacing stopped subscriber");
        }

        let connection = self.connector.connect(&endpoint).await?;
        let subscriber = Arc::new(Subscriber::start(
            endpoint,
            connection,
            self.config.clone(),
        ));
        *current = Some(subscriber.clone());

        Ok(subscriber)
    }

    /// Останавливает всех подписчиков и очищает пул.
    pub async fn close_all(&self) {
        let drained: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let mut count = 0;

        for slot in drained {
            let subscriber = slot.lock().await.take();
            if let Some(subscriber) = subscriber {
                subscriber.shutdown().await;
                count += 1;
            }
        }

        if count > 0 {
            info!(count, "subscriber pool closed");
        }
    }

    /// Количество адресов, для которых уже создан подписчик.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();

        let mut len = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                len += 1;
            }
        }
        len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn slot(
        &self,
        endpoint: &Endpoint,
    ) -> Slot {
        self.slots
            .lock()
            .entry(endpoint.clone())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::MemoryHub;

    fn pool(hub: &MemoryHub) -> SubscriberPool {
        SubscriberPool::with_connector(
            Arc::new(hub.clone()),
            SubscriberConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        )
    }

    /// Тест проверяет переиспользование подписчика и нормализацию адреса.
    #[tokio::test]
    async fn test_reuses_subscriber_per_endpoint() {
        let hub = MemoryHub::default();
        let pool = pool(&hub);

        let a = pool.get(None, None).await.unwrap();
        let b = pool.get(Some("localhost"), Some(10133)).await.unwrap();
        let c = pool.get(None, Some(10134)).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len().await, 2);
    }

    /// Тест проверяет, что параллельные первые обращения дают одного
    /// подписчика.
    #[tokio::test]
    async fn test_concurrent_first_use() {
        let hub = MemoryHub::default();
        let pool = Arc::new(pool(&hub));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get(None, Some(1)).await.unwrap() })
            })
            .collect();

        let mut subscribers = Vec::new();
        for handle in handles {
            subscribers.push(handle.await.unwrap());
        }
        assert!(subscribers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(hub.receiver_count(1), 1);
    }

    /// Тест проверяет, что медленное подключение к одному адресу не
    /// задерживает выдачу подписчика для другого.
    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_endpoints() {
        struct GatedConnector {
            hub: MemoryHub,
            gate: Arc<tokio::sync::Notify>,
        }

        #[async_trait::async_trait]
        impl Connector for GatedConnector {
            async fn connect(
                &self,
                endpoint: &Endpoint,
            ) -> Result<crate::transport::SubscriberConnection, TransportError> {
                if endpoint.port == 1 {
                    self.gate.notified().await;
                }
                self.hub.connect(endpoint).await
            }
        }

        let gate = Arc::new(tokio::sync::Notify::new());
        let pool = Arc::new(SubscriberPool::with_connector(
            Arc::new(GatedConnector {
                hub: MemoryHub::default(),
                gate: gate.clone(),
            }),
            SubscriberConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        ));

        let slow = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(None, Some(1)).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other = tokio::time::timeout(Duration::from_millis(500), pool.get(None, Some(2)))
            .await
            .expect("other endpoint waited for a slow connect")
            .unwrap();
        assert!(other.is_running());
        assert!(!slow.is_finished());

        gate.notify_one();
        let slow = slow.await.unwrap();
        assert_eq!(slow.endpoint().port, 1);
        assert_eq!(pool.len().await, 2);
    }

    /// Тест проверяет остановку всех подписчиков и замену остановленного.
    #[tokio::test]
    async fn test_close_all_and_replace_stopped() {
        let hub = MemoryHub::default();
        let pool = pool(&hub);

        let first = pool.get(None, Some(2)).await.unwrap();
        pool.close_all().await;
        assert!(pool.is_empty().await);
        assert!(!first.is_running());

        let second = pool.get(None, Some(2)).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        second.stop();
        let third = pool.get(None, Some(2)).await.unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert!(third.is_running());
    }
}

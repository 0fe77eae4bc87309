use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use pubcast_error::{ErrorExt, RegistrationError, TransportError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{normalize_topic, CallbackRegistry, SharedCallback};
use crate::{
    protocol::frame,
    transport::{
        Connector, Endpoint, FrameSource, SubscriberConnection, SubscriptionControl, TcpConnector,
        TcpSubscriberConfig,
    },
};

/// Интервал опроса транспорта по умолчанию.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Настройки подписчика.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Как долго цикл приёма ждёт фрейм, прежде чем снова проверить флаг
    /// остановки
    pub poll_interval: Duration,
    /// Настройки TCP-подключения
    pub tcp: TcpSubscriberConfig,
}

/// Состояние подписчика. Переход возможен только из `Running` в `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Running,
    Stopped,
}

/// Счётчики цикла приёма.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    /// Принятые фреймы
    pub received: AtomicU64,
    /// Фреймы, пропущенные без декодирования: нет ни одного callback-а
    pub skipped: AtomicU64,
    /// Фреймы, которые не удалось декодировать
    pub decode_failures: AtomicU64,
    /// Ошибки и паники callback-ов
    pub callback_failures: AtomicU64,
    /// Нефатальные ошибки транспорта
    pub transport_errors: AtomicU64,
}

/// Подписчик: одно подключение к публикатору, один фоновый цикл приёма и
/// реестр callback-ов.
pub struct Subscriber {
    endpoint: Endpoint,
    control: Arc<dyn SubscriptionControl>,
    registry: Arc<CallbackRegistry>,
    /// Поднят после `stop` или после фатальной ошибки транспорта
    stopped: Arc<AtomicBool>,
    stats: Arc<SubscriberStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Всё, что нужно фоновому циклу приёма.
struct ReceiveLoop {
    endpoint: Endpoint,
    source: Box<dyn FrameSource>,
    dispatcher: Arc<Dispatcher>,
    stopped: Arc<AtomicBool>,
    stats: Arc<SubscriberStats>,
    poll_interval: Duration,
}

/// Декодирование и вызов callback-ов. Работает в пуле блокирующих потоков:
/// callback-и синхронные и могут блокироваться.
struct Dispatcher {
    endpoint: Endpoint,
    registry: Arc<CallbackRegistry>,
    stats: Arc<SubscriberStats>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Subscriber {
    /// Запускает цикл приёма поверх готового подключения.
    ///
    /// Должен вызываться внутри tokio runtime.
    pub fn start(
        endpoint: Endpoint,
        connection: SubscriberConnection,
        config: SubscriberConfig,
    ) -> Self {
        let registry = Arc::new(CallbackRegistry::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SubscriberStats::default());

        let receive_loop = ReceiveLoop {
            endpoint: endpoint.clone(),
            source: connection.source,
            dispatcher: Arc::new(Dispatcher {
                endpoint: endpoint.clone(),
                registry: registry.clone(),
                stats: stats.clone(),
            }),
            stopped: stopped.clone(),
            stats: stats.clone(),
            poll_interval: config.poll_interval,
        };
        let task = tokio::spawn(receive_loop.run());

        Self {
            endpoint,
            control: connection.control,
            registry,
            stopped,
            stats,
            task: Mutex::new(Some(task)),
        }
    }

    /// Подключается к публикатору по TCP. `None` означает значение по
    /// умолчанию (`localhost` и порт 10133).
    pub async fn connect(
        address: Option<&str>,
        port: Option<u16>,
        config: SubscriberConfig,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::resolve(address, port);
        let connection = TcpConnector::new(config.tcp.clone())
            .connect(&endpoint)
            .await?;
        Ok(Self::start(endpoint, connection, config))
    }

    /// Регистрирует callback на топик (точное совпадение, с учётом регистра)
    /// или на все топики, и подписывает транспорт.
    ///
    /// Подписчик хранит только слабую ссылку: как только вызывающая сторона
    /// отпустит последний `SharedCallback`, вызовы прекратятся.
    pub async fn register(
        &self,
        callback: &SharedCallback,
        topic: Option<&str>,
    ) -> Result<(), RegistrationError> {
        if self.is_stopped() {
            return Err(RegistrationError::Stopped);
        }

        let topic = topic.map(normalize_topic).transpose()?;
        let prefix = topic.as_deref().unwrap_or_default();

        self.control.subscribe(prefix.as_bytes()).await?;
        self.registry.register(callback, topic.as_deref())?;

        debug!(
            endpoint = %self.endpoint,
            topic = topic.as_deref().unwrap_or("*"),
            "callback registered"
        );
        Ok(())
    }

    /// Поднимает флаг остановки. Цикл завершится не позже чем через
    /// интервал опроса.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.endpoint, "subscriber stop requested");
        }
    }

    /// Останавливает подписчика и дожидается завершения цикла приёма.
    pub async fn shutdown(&self) {
        self.stop();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(endpoint = %self.endpoint, error = %e, "receive loop aborted");
            }
        }
    }

    pub fn state(&self) -> SubscriberState {
        if self.is_stopped() {
            SubscriberState::Stopped
        } else {
            SubscriberState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SubscriberState::Running
    }

    /// Есть ли сейчас соединение с публикатором. Транспорты без понятия
    /// соединения всегда отвечают `true`.
    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }
}

impl ReceiveLoop {
    async fn run(mut self) {
        info!(endpoint = %self.endpoint, "receive loop started");

        while !self.stopped.load(Ordering::Acquire) {
            let frame = match self.source.recv_timeout(self.poll_interval).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) if e.is_fatal() => {
                    error!(
                        endpoint = %self.endpoint,
                        code = %e.status_code(),
                        error = %e,
                        "transport failed, stopping"
                    );
                    break;
                }
                Err(e) => {
                    self.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        endpoint = %self.endpoint,
                        code = %e.status_code(),
                        error = %e,
                        "receive failed"
                    );
                    continue;
                }
            };

            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            if !self.dispatcher.registry.has_callbacks() {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // Следующий фрейм читается только после того, как отработали
            // все callback-и текущего.
            let dispatcher = self.dispatcher.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.handle(frame)).await {
                error!(endpoint = %self.endpoint, error = %e, "dispatch task failed");
            }
        }

        self.stopped.store(true, Ordering::Release);
        info!(endpoint = %self.endpoint, "receive loop stopped");
    }
}

impl Dispatcher {
    fn handle(
        &self,
        frame: Bytes,
    ) {
        let message = match frame::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    endpoint = %self.endpoint,
                    code = %e.status_code(),
                    error = %e,
                    "dropping undecodable frame"
                );
                return;
            }
        };

        let report = self.registry.dispatch(&message);
        if report.failed > 0 {
            self.stats
                .callback_failures
                .fetch_add(report.failed as u64, Ordering::Relaxed);
        }
        trace!(
            topic = %message.topic,
            invoked = report.invoked,
            failed = report.failed,
            "message dispatched"
        );
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            tcp: TcpSubscriberConfig::default(),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::{
        protocol::{encode_bulk, encode_normal, Event},
        subscribe::callback,
        transport::{FrameSink, MemoryHub, MemoryPublisher},
    };

    fn fast() -> SubscriberConfig {
        SubscriberConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn setup(port: u16) -> (MemoryHub, MemoryPublisher, Subscriber) {
        let hub = MemoryHub::default();
        let publisher = hub.bind(port).unwrap();
        let subscriber = Subscriber::start(
            Endpoint::new("memory", port),
            hub.connect_port(port),
            fast(),
        );
        (hub, publisher, subscriber)
    }

    async fn wait_for(
        count: &AtomicUsize,
        expected: usize,
    ) {
        timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callback was not invoked in time");
    }

    /// Тест проверяет доставку события зарегистрированному callback-у.
    #[tokio::test]
    async fn test_receive_and_dispatch() {
        let (_hub, publisher, subscriber) = setup(1);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let cb = callback(move |message| {
            assert_eq!(message.topic, "tick");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        subscriber.register(&cb, Some("tick")).await.unwrap();
        let frame = encode_normal("tick", &Event::new("tick")).unwrap();
        publisher.send(frame).await.unwrap();

        wait_for(&count, 1).await;
        assert_eq!(subscriber.stats().received.load(Ordering::Relaxed), 1);
    }

    /// Тест проверяет, что битый фрейм не останавливает цикл.
    #[tokio::test]
    async fn test_decode_failure_keeps_loop_alive() {
        let (_hub, publisher, subscriber) = setup(2);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let cb = callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        subscriber.register(&cb, None).await.unwrap();

        publisher.send(Bytes::from_static(b"broken")).await.unwrap();
        publisher.send(Bytes::from_static(b"tick {oops")).await.unwrap();
        publisher.send(encode_bulk("frame", 1, b"ok")).await.unwrap();

        wait_for(&count, 1).await;
        assert_eq!(subscriber.stats().decode_failures.load(Ordering::Relaxed), 2);
        assert!(subscriber.is_running());
    }

    /// Тест проверяет, что без callback-ов фреймы не декодируются.
    #[tokio::test]
    async fn test_no_callbacks_skips_decode() {
        let (_hub, publisher, subscriber) = setup(3);
        // Подписка напрямую через транспорт, минуя реестр.
        subscriber.control.subscribe(b"").await.unwrap();
        publisher.send(Bytes::from_static(b"garbage")).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while subscriber.stats().skipped.load(Ordering::Relaxed) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(subscriber.stats().decode_failures.load(Ordering::Relaxed), 0);
    }

    /// Тест проверяет остановку и запрет регистрации после неё.
    #[tokio::test]
    async fn test_shutdown_then_register_fails() {
        let (_hub, _publisher, subscriber) = setup(4);
        assert_eq!(subscriber.state(), SubscriberState::Running);

        timeout(Duration::from_secs(1), subscriber.shutdown())
            .await
            .unwrap();
        assert_eq!(subscriber.state(), SubscriberState::Stopped);

        let cb = callback(|_| Ok(()));
        assert!(matches!(
            subscriber.register(&cb, None).await,
            Err(RegistrationError::Stopped)
        ));
    }

    /// Тест проверяет, что блокирующийся callback одного подписчика не
    /// задерживает доставку другому подписчику того же публикатора.
    #[tokio::test]
    async fn test_blocking_callback_does_not_starve_other_subscriber() {
        let hub = MemoryHub::default();
        let publisher = hub.bind(6).unwrap();
        let slow = Subscriber::start(Endpoint::new("memory", 6), hub.connect_port(6), fast());
        let fast_sub = Subscriber::start(Endpoint::new("memory", 6), hub.connect_port(6), fast());

        let slow_cb = callback(|_| {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(())
        });
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let fast_cb = callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        slow.register(&slow_cb, Some("tick")).await.unwrap();
        fast_sub.register(&fast_cb, Some("tick")).await.unwrap();

        let started = std::time::Instant::now();
        let frame = encode_normal("tick", &Event::new("tick")).unwrap();
        publisher.send(frame).await.unwrap();

        wait_for(&count, 1).await;
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "delivery took {:?}",
            started.elapsed()
        );
        assert!(slow.is_running());
    }

    /// Тест проверяет, что закрытый транспорт переводит подписчика в
    /// `Stopped`.
    #[tokio::test]
    async fn test_fatal_transport_error_stops() {
        struct ClosedSource;

        #[async_trait::async_trait]
        impl FrameSource for ClosedSource {
            async fn recv_timeout(
                &mut self,
                _timeout: Duration,
            ) -> Result<Option<Bytes>, TransportError> {
                Err(TransportError::Closed)
            }
        }

        let hub = MemoryHub::default();
        let connection = SubscriberConnection {
            control: hub.connect_port(5).control,
            source: Box::new(ClosedSource),
        };
        let subscriber = Subscriber::start(Endpoint::new("memory", 5), connection, fast());

        timeout(Duration::from_secs(1), async {
            while subscriber.is_running() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
    }
}

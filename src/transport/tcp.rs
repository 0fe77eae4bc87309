//! TCP-транспорт.
//!
//! Поверх сокета ходят фреймы с 4-байтовым префиксом длины (big-endian).
//! Публикатор шлёт подписчикам фреймы данных. Подписчик шлёт публикатору
//! управляющие фреймы:
//! - `0x01 <prefix>`: подписаться на префикс топика;
//! - `0x00 <prefix>`: отписаться.
//!
//! Фильтрация по подпискам выполняется на стороне публикатора. У каждого
//! подписчика своя ограниченная очередь: если она заполнена, фрейм для
//! этого подписчика отбрасывается, остальные подписчики его получают.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use pubcast_error::TransportError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tracing::{debug, info, trace, warn};

use super::{
    matches_any, Connector, Endpoint, FrameSink, FrameSource, SubscriberConnection,
    SubscriptionControl,
};

/// Максимальный размер фрейма по умолчанию (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
/// Ёмкость очереди одного подписчика по умолчанию.
pub const DEFAULT_PEER_QUEUE_CAPACITY: usize = 1000;

const LEN_PREFIX: usize = 4;
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

const CONTROL_UNSUBSCRIBE: u8 = 0x00;
const CONTROL_SUBSCRIBE: u8 = 0x01;

/// Настройки TCP-публикатора.
#[derive(Debug, Clone)]
pub struct TcpPublisherConfig {
    /// Сколько фреймов может ждать отправки одному подписчику
    pub peer_queue_capacity: usize,
    /// Максимальный размер фрейма в байтах
    pub max_frame_size: usize,
}

/// Настройки TCP-подписчика.
#[derive(Debug, Clone)]
pub struct TcpSubscriberConfig {
    /// Таймаут одной попытки подключения
    pub connect_timeout: Duration,
    /// Пауза между попытками переподключения
    pub reconnect_interval: Duration,
    /// Максимальный размер фрейма в байтах
    pub max_frame_size: usize,
}

/// Сокет публикатора: принимает подписчиков и рассылает им фреймы.
pub struct TcpPublisher {
    local_addr: SocketAddr,
    peers: Arc<DashMap<u64, Peer>>,
    max_frame_size: usize,
    accept_task: JoinHandle<()>,
}

/// Подключённый подписчик с точки зрения публикатора.
struct Peer {
    addr: SocketAddr,
    prefixes: Arc<RwLock<Vec<Bytes>>>,
    tx: mpsc::Sender<Bytes>,
}

/// Фабрика TCP-подключений подписчика.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TcpSubscriberConfig,
}

/// Состояние, общее для управления подписками и цикла приёма.
struct SharedConnection {
    endpoint: Endpoint,
    /// Все подписки; повторно отправляются после переподключения
    subscriptions: Mutex<Vec<Bytes>>,
    /// Пишущая половина текущего соединения, если оно есть
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Поднят, пока соединение с публикатором живо
    connected: AtomicBool,
}

struct TcpSubscriptionControl {
    shared: Arc<SharedConnection>,
}

struct TcpFrameSource {
    shared: Arc<SharedConnection>,
    config: TcpSubscriberConfig,
    reader: Option<OwnedReadHalf>,
    buffer: BytesMut,
    next_attempt: Option<Instant>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TcpPublisher {
    /// Занимает порт на всех интерфейсах и начинает принимать подписчиков.
    ///
    /// Порт `0` означает «любой свободный», фактический адрес отдаёт
    /// [`TcpPublisher::local_addr`].
    pub async fn bind(
        port: u16,
        config: TcpPublisherConfig,
    ) -> Result<Self, TransportError> {
        let bind_err = |e: std::io::Error| TransportError::Bind {
            port,
            reason: e.to_string(),
        };

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!(%local_addr, "publisher listening");

        let peers = Arc::new(DashMap::new());
        let accept_task = tokio::spawn(accept_loop(listener, peers.clone(), config.clone()));

        Ok(Self {
            local_addr,
            peers,
            max_frame_size: config.max_frame_size,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Количество подключённых подписчиков.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl TcpConnector {
    pub fn new(config: TcpSubscriberConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpSubscriberConfig {
        &self.config
    }
}

impl SharedConnection {
    /// Запоминает префикс. Возвращает `false`, если он уже был.
    fn remember(
        &self,
        prefix: &[u8],
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.iter().any(|p| p.as_ref() == prefix) {
            return false;
        }
        subscriptions.push(Bytes::copy_from_slice(prefix));
        true
    }
}

impl TcpFrameSource {
    fn new(
        endpoint: Endpoint,
        config: TcpSubscriberConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SharedConnection {
                endpoint,
                subscriptions: Mutex::new(Vec::new()),
                writer: AsyncMutex::new(None),
                connected: AtomicBool::new(false),
            }),
            config,
            reader: None,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            next_attempt: None,
        }
    }

    /// Одна попытка подключения, не позже `deadline`.
    ///
    /// Между неудачными попытками выдерживается `reconnect_interval`.
    async fn try_connect(
        &mut self,
        deadline: Instant,
    ) -> Result<(), TransportError> {
        if let Some(at) = self.next_attempt {
            if at > deadline {
                tokio::time::sleep_until(deadline).await;
                return Ok(());
            }
            tokio::time::sleep_until(at).await;
        }

        let endpoint = &self.shared.endpoint;
        let attempt_deadline = deadline.min(Instant::now() + self.config.connect_timeout);

        let stream = match timeout_at(attempt_deadline, TcpStream::connect(endpoint.socket_addr()))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.next_attempt = Some(Instant::now() + self.config.reconnect_interval);
                return Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.next_attempt = Some(Instant::now() + self.config.reconnect_interval);
                return Err(TransportError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let (reader, mut writer) = stream.into_split();

        // Лок на writer держится, пока подписки повторно отправляются:
        // параллельный `subscribe` дождётся и допишет свою.
        let mut slot = self.shared.writer.lock().await;
        let subscriptions = self.shared.subscriptions.lock().clone();
        for prefix in &subscriptions {
            if let Err(e) = write_control(&mut writer, CONTROL_SUBSCRIBE, prefix).await {
                self.next_attempt = Some(Instant::now() + self.config.reconnect_interval);
                return Err(e);
            }
        }
        *slot = Some(writer);
        self.shared.connected.store(true, Ordering::Release);
        drop(slot);

        debug!(
            endpoint = %self.shared.endpoint,
            subscriptions = subscriptions.len(),
            "subscriber connected"
        );

        self.reader = Some(reader);
        self.buffer.clear();
        self.next_attempt = None;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.reader = None;
        self.buffer.clear();
        *self.shared.writer.lock().await = None;
        self.shared.connected.store(false, Ordering::Release);
        self.next_attempt = Some(Instant::now() + self.config.reconnect_interval);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация транспортных трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for TcpPublisherConfig {
    fn default() -> Self {
        Self {
            peer_queue_capacity: DEFAULT_PEER_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for TcpSubscriberConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_millis(500),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Drop for TcpPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
        // Закрытые очереди завершают задачи подписчиков и их сокеты.
        self.peers.clear();
    }
}

#[async_trait]
impl FrameSink for TcpPublisher {
    async fn send(
        &self,
        frame: Bytes,
    ) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        for peer in self.peers.iter() {
            if !matches_any(&peer.prefixes.read(), &frame) {
                continue;
            }
            match peer.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(peer = %peer.addr, "subscriber queue is full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(peer = %peer.addr, "subscriber is gone");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SubscriptionControl for TcpSubscriptionControl {
    async fn subscribe(
        &self,
        prefix: &[u8],
    ) -> Result<(), TransportError> {
        if !self.shared.remember(prefix) {
            return Ok(());
        }

        let mut slot = self.shared.writer.lock().await;
        if let Some(writer) = slot.as_mut() {
            // Обрыв здесь не ошибка подписки: префикс запомнен и уйдёт
            // публикатору при переподключении.
            if let Err(e) = write_control(writer, CONTROL_SUBSCRIBE, prefix).await {
                debug!(error = %e, "subscription deferred until reconnect");
                *slot = None;
                self.shared.connected.store(false, Ordering::Release);
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            match take_frame(&mut self.buffer, self.config.max_frame_size) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => {
                    // Поток рассинхронизирован, дальше читать его нельзя.
                    self.disconnect().await;
                    return Err(e);
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            if self.reader.is_none() {
                if let Err(e) = self.try_connect(deadline).await {
                    debug!(error = %e, "publisher unreachable, will retry");
                }
                continue;
            }

            let read = match self.reader.as_mut() {
                Some(reader) => timeout_at(deadline, reader.read_buf(&mut self.buffer)).await,
                None => continue,
            };

            match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    debug!(endpoint = %self.shared.endpoint, "publisher closed the connection");
                    self.disconnect().await;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(endpoint = %self.shared.endpoint, error = %e, "read failed");
                    self.disconnect().await;
                }
            }
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    /// Подключение ленивое: если публикатор пока недоступен, это только
    /// логируется, а источник будет переподключаться сам.
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<SubscriberConnection, TransportError> {
        let mut source = TcpFrameSource::new(endpoint.clone(), self.config.clone());

        let deadline = Instant::now() + self.config.connect_timeout;
        if let Err(e) = source.try_connect(deadline).await {
            warn!(%endpoint, error = %e, "publisher not reachable yet");
        }

        Ok(SubscriberConnection {
            control: Arc::new(TcpSubscriptionControl {
                shared: source.shared.clone(),
            }),
            source: Box::new(source),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Вспомогательные функции
////////////////////////////////////////////////////////////////////////////////

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<DashMap<u64, Peer>>,
    config: TcpPublisherConfig,
) {
    let next_id = AtomicU64::new(0);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(config.peer_queue_capacity.max(1));
        let prefixes = Arc::new(RwLock::new(Vec::new()));

        peers.insert(
            id,
            Peer {
                addr,
                prefixes: prefixes.clone(),
                tx,
            },
        );
        debug!(peer = %addr, "subscriber connected");

        let peers = peers.clone();
        let max_frame_size = config.max_frame_size;
        tokio::spawn(async move {
            if let Err(e) = serve_peer(stream, rx, prefixes, max_frame_size).await {
                debug!(peer = %addr, error = %e, "subscriber connection failed");
            }
            peers.remove(&id);
            debug!(peer = %addr, "subscriber disconnected");
        });
    }
}

/// Обслуживает одного подписчика: пишет ему фреймы из очереди и читает
/// его управляющие фреймы.
async fn serve_peer(
    stream: TcpStream,
    mut rx: mpsc::Receiver<Bytes>,
    prefixes: Arc<RwLock<Vec<Bytes>>>,
    max_frame_size: usize,
) -> Result<(), TransportError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

    enum PeerEvent {
        Outgoing(Option<Bytes>),
        Incoming(std::io::Result<usize>),
    }

    loop {
        let event = tokio::select! {
            frame = rx.recv() => PeerEvent::Outgoing(frame),
            read = reader.read_buf(&mut buffer) => PeerEvent::Incoming(read),
        };

        match event {
            PeerEvent::Outgoing(Some(frame)) => write_frame(&mut writer, &frame).await?,
            PeerEvent::Outgoing(None) => return Ok(()),
            PeerEvent::Incoming(read) => {
                if read? == 0 {
                    return Ok(());
                }
                while let Some(control) = take_frame(&mut buffer, max_frame_size)? {
                    apply_control(&prefixes, &control);
                }
            }
        }
    }
}

fn apply_control(
    prefixes: &RwLock<Vec<Bytes>>,
    control: &Bytes,
) {
    let Some((&kind, prefix)) = control.split_first() else {
        warn!("empty control frame ignored");
        return;
    };

    let mut prefixes = prefixes.write();
    match kind {
        CONTROL_SUBSCRIBE => {
            if !prefixes.iter().any(|p| p.as_ref() == prefix) {
                prefixes.push(control.slice(1..));
            }
        }
        CONTROL_UNSUBSCRIBE => prefixes.retain(|p| p.as_ref() != prefix),
        other => warn!(kind = other, "unknown control frame ignored"),
    }
}

/// Извлекает из буфера один фрейм с префиксом длины, если он пришёл целиком.
fn take_frame(
    buffer: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<Bytes>, TransportError> {
    if buffer.len() < LEN_PREFIX {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if len > max_frame_size {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    if buffer.len() < LEN_PREFIX + len {
        buffer.reserve(LEN_PREFIX + len - buffer.len());
        return Ok(None);
    }

    buffer.advance(LEN_PREFIX);
    Ok(Some(buffer.split_to(len).freeze()))
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(frame.len()).map_err(|_| TransportError::FrameTooLarge {
        size: frame.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = BytesMut::with_capacity(LEN_PREFIX + frame.len());
    out.put_u32(len);
    out.put_slice(frame);

    writer
        .write_all(&out)
        .await
        .map_err(|e| TransportError::Send {
            reason: e.to_string(),
        })
}

async fn write_control(
    writer: &mut OwnedWriteHalf,
    kind: u8,
    prefix: &[u8],
) -> Result<(), TransportError> {
    let mut control = BytesMut::with_capacity(1 + prefix.len());
    control.put_u8(kind);
    control.put_slice(prefix);
    write_frame(writer, &control).await
}

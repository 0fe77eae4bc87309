//! Подписывающая сторона: callback-и, их реестр, цикл приёма и пул
//! подключений.

pub mod callback;
pub mod pool;
pub mod registry;
pub mod subscriber;

pub use callback::{callback, Callback, CallbackResult, SharedCallback};
pub use pool::SubscriberPool;
pub use registry::{normalize_topic, CallbackRegistry, DispatchReport};
pub use subscriber::{
    Subscriber, SubscriberConfig, SubscriberState, SubscriberStats, DEFAULT_POLL_INTERVAL,
};

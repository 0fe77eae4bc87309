//! Общие помощники интеграционных тестов.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use pubcast::{callback, Message, SharedCallback, SubscriberConfig};

/// Быстрый опрос, чтобы тесты не ждали по секунде.
pub fn fast_config() -> SubscriberConfig {
    let mut config = SubscriberConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    };
    config.tcp.connect_timeout = Duration::from_millis(500);
    config.tcp.reconnect_interval = Duration::from_millis(20);
    config
}

/// Callback, складывающий все сообщения в общий вектор.
pub fn collector() -> (SharedCallback, Arc<Mutex<Vec<Message>>>) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let cb = callback(move |message| {
        sink.lock().push(message.clone());
        Ok(())
    });
    (cb, messages)
}

/// Ждёт, пока в векторе окажется не меньше `count` сообщений.
pub async fn wait_for(
    messages: &Mutex<Vec<Message>>,
    count: usize,
) -> Vec<Message> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let messages = messages.lock();
                if messages.len() >= count {
                    return messages.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {count} messages, got {}", messages.lock().len()))
}

//! Сквозные тесты поверх TCP.
//!
//! Подписка доходит до публикатора асинхронно, поэтому публикация
//! повторяется, пока подписчик не получит первое сообщение.

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use parking_lot::Mutex;
use pubcast::{
    transport::TcpPublisherConfig, Event, Message, Payload, Publisher, Subscriber, SubscriberPool,
};

mod common;
use common::{collector, fast_config, wait_for};

async fn bind() -> (Publisher, u16) {
    let publisher = Publisher::bind(0, TcpPublisherConfig::default())
        .await
        .unwrap();
    let port = publisher.local_addr().unwrap().port();
    (publisher, port)
}

async fn publish_until_received(
    publisher: &Publisher,
    name: &str,
    messages: &Mutex<Vec<Message>>,
) {
    for _ in 0..100 {
        publisher.publish(&mut Event::new(name), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !messages.lock().is_empty() {
            return;
        }
    }
    panic!("subscription never reached the publisher");
}

/// Тест проверяет доставку события и bulk по TCP.
#[tokio::test]
async fn test_tcp_event_and_bulk() {
    let (publisher, port) = bind().await;
    let subscriber = Subscriber::connect(Some("127.0.0.1"), Some(port), fast_config())
        .await
        .unwrap();

    let (warmup_cb, warmup) = collector();
    subscriber.register(&warmup_cb, Some("warmup")).await.unwrap();
    publish_until_received(&publisher, "warmup", &warmup).await;
    assert!(subscriber.is_connected());

    let (bulk_cb, bulks) = collector();
    subscriber.register(&bulk_cb, Some("image;bulk")).await.unwrap();
    let (event_cb, events) = collector();
    subscriber.register(&event_cb, Some("image")).await.unwrap();

    // Подписки отправлены по тому же соединению раньше следующего
    // сообщения-маркера, поэтому маркер гарантирует, что они применены.
    warmup.lock().clear();
    publish_until_received(&publisher, "warmup", &warmup).await;

    let payload: Vec<u8> = (0..=255).collect();
    let id = publisher
        .publish(
            &mut Event::new("image").with_field("width", 16),
            Some(&payload),
        )
        .await
        .unwrap();

    let bulk = wait_for(&bulks, 1).await.remove(0);
    match bulk.payload {
        Payload::Bulk(bulk) => {
            assert_eq!(bulk.pub_id, id);
            assert_eq!(bulk.data.as_ref(), payload.as_slice());
        }
        other => panic!("expected bulk, got {other:?}"),
    }

    let event = wait_for(&events, 1).await.remove(0);
    let event = event.payload.as_event().unwrap();
    assert_eq!(event.id(), Some(id as u64));
    assert!(event.is_bulk());

    subscriber.shutdown().await;
}

/// Тест проверяет фильтрацию на стороне публикатора: неподписанные топики
/// до подписчика не доходят.
#[tokio::test]
async fn test_tcp_server_side_filtering() {
    let (publisher, port) = bind().await;
    let subscriber = Subscriber::connect(Some("127.0.0.1"), Some(port), fast_config())
        .await
        .unwrap();

    let (cb, messages) = collector();
    subscriber.register(&cb, Some("wanted")).await.unwrap();
    publish_until_received(&publisher, "wanted", &messages).await;

    publisher
        .publish(&mut Event::new("unwanted"), None)
        .await
        .unwrap();
    publisher
        .publish(&mut Event::new("wanted"), None)
        .await
        .unwrap();

    let before = messages.lock().len();
    wait_for(&messages, before + 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(messages.lock().iter().all(|m| m.topic == "wanted"));
    assert_eq!(subscriber.stats().skipped.load(Ordering::Relaxed), 0);

    subscriber.shutdown().await;
}

/// Тест проверяет, что несколько подписчиков получают одно и то же.
#[tokio::test]
async fn test_tcp_fan_out() {
    let (publisher, port) = bind().await;
    let pool_a = SubscriberPool::new(fast_config());
    let pool_b = SubscriberPool::new(fast_config());

    let a = pool_a.get(Some("127.0.0.1"), Some(port)).await.unwrap();
    let b = pool_b.get(Some("127.0.0.1"), Some(port)).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    let (cb_a, got_a) = collector();
    let (cb_b, got_b) = collector();
    a.register(&cb_a, None).await.unwrap();
    b.register(&cb_b, None).await.unwrap();

    for _ in 0..100 {
        publisher.publish(&mut Event::new("ping"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !got_a.lock().is_empty() && !got_b.lock().is_empty() {
            break;
        }
    }

    assert!(!got_a.lock().is_empty());
    assert!(!got_b.lock().is_empty());

    pool_a.close_all().await;
    pool_b.close_all().await;
}

//! Сквозные тесты публикатор → подписчик через внутрипроцессный хаб.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use pubcast::{
    callback, Endpoint, Event, MemoryHub, Payload, Publisher, Subscriber, SubscriberPool,
    SubscriberState,
};
use serde_json::json;

mod common;
use common::{collector, fast_config, wait_for};

fn setup(port: u16) -> (MemoryHub, Publisher, Subscriber) {
    let hub = MemoryHub::default();
    let publisher = Publisher::with_transport(Arc::new(hub.bind(port).unwrap()));
    let subscriber = Subscriber::start(
        Endpoint::new("memory", port),
        hub.connect_port(port),
        fast_config(),
    );
    (hub, publisher, subscriber)
}

/// Тест проверяет пример из описания протокола: два события `tick` с id 0
/// и 1.
#[tokio::test]
async fn test_tick_events_get_sequential_ids() {
    let (_hub, publisher, subscriber) = setup(1);
    let (cb, messages) = collector();
    subscriber.register(&cb, Some("tick")).await.unwrap();

    let mut event = Event::new("tick").with_field("value", 1);
    publisher.publish(&mut event, None).await.unwrap();
    let mut event = Event::new("tick").with_field("value", 1);
    publisher.publish(&mut event, None).await.unwrap();

    let received = wait_for(&messages, 2).await;
    let bodies: Vec<_> = received
        .iter()
        .map(|m| serde_json::to_value(m.payload.as_event().unwrap()).unwrap())
        .collect();
    assert_eq!(
        bodies,
        vec![
            json!({"name": "tick", "value": 1, "id": 0}),
            json!({"name": "tick", "value": 1, "id": 1}),
        ]
    );
}

/// Тест проверяет bulk: callback топика `frame;bulk` получает байты как
/// есть, callback `frame` получает событие с `bulk: true`.
#[tokio::test]
async fn test_bulk_is_delivered_verbatim() {
    let (_hub, publisher, subscriber) = setup(2);
    let (event_cb, events) = collector();
    let (bulk_cb, bulks) = collector();
    subscriber.register(&event_cb, Some("frame")).await.unwrap();
    subscriber.register(&bulk_cb, Some("frame;bulk")).await.unwrap();

    for _ in 0..5 {
        publisher.sequencer().next();
    }
    let mut event = Event::new("frame");
    let id = publisher
        .publish(&mut event, Some(b"\x00\x01\x02"))
        .await
        .unwrap();
    assert_eq!(id, 5);

    let bulk = wait_for(&bulks, 1).await.remove(0);
    assert_eq!(bulk.topic, "frame;bulk");
    match bulk.payload {
        Payload::Bulk(payload) => {
            assert_eq!(payload.pub_id, 5);
            assert_eq!(&payload.data[..], b"\x00\x01\x02");
        }
        other => panic!("expected bulk, got {other:?}"),
    }

    let event = wait_for(&events, 1).await.remove(0);
    let event = event.payload.as_event().unwrap();
    assert!(event.is_bulk());
    assert_eq!(event.id(), Some(5));
}

/// Тест проверяет, что callback без топика получает сообщения разных
/// топиков, а callback топика только свой, с учётом регистра.
#[tokio::test]
async fn test_all_topics_vs_exact_topic() {
    let (_hub, publisher, subscriber) = setup(3);
    let (all_cb, all) = collector();
    let (exact_cb, exact) = collector();
    subscriber.register(&all_cb, None).await.unwrap();
    subscriber.register(&exact_cb, Some("alpha")).await.unwrap();

    for name in ["alpha", "beta", "Alpha", "alphabet"] {
        publisher.publish(&mut Event::new(name), None).await.unwrap();
    }

    let all = wait_for(&all, 4).await;
    let topics: Vec<_> = all.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(topics, vec!["alpha", "beta", "Alpha", "alphabet"]);

    let exact = exact.lock().clone();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].topic, "alpha");
}

/// Тест проверяет, что отпущенный callback больше не вызывается и
/// удаляется из реестра.
#[tokio::test]
async fn test_dropped_callback_is_pruned() {
    let (_hub, publisher, subscriber) = setup(4);
    let (keeper, kept) = collector();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let transient = callback(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    subscriber.register(&transient, Some("tick")).await.unwrap();
    subscriber.register(&keeper, Some("tick")).await.unwrap();
    assert_eq!(subscriber.registry().len_topic("tick"), 2);
    drop(transient);

    publisher.publish(&mut Event::new("tick"), None).await.unwrap();
    wait_for(&kept, 1).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(subscriber.registry().len_topic("tick"), 1);
}

/// Тест проверяет, что ошибка и паника одного callback-а не мешают
/// другому получить то же сообщение.
#[tokio::test]
async fn test_failing_callback_does_not_block_others() {
    let (_hub, publisher, subscriber) = setup(5);
    let failing = callback(|_| Err("refused".into()));
    let panicking = callback(|_| panic!("callback bug"));
    let (good, received) = collector();

    subscriber.register(&failing, Some("tick")).await.unwrap();
    subscriber.register(&panicking, Some("tick")).await.unwrap();
    subscriber.register(&good, Some("tick")).await.unwrap();

    publisher.publish(&mut Event::new("tick"), None).await.unwrap();
    publisher.publish(&mut Event::new("tick"), None).await.unwrap();

    wait_for(&received, 2).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while subscriber.stats().callback_failures.load(Ordering::Relaxed) < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(subscriber.is_running());
}

/// Тест проверяет, что регистрация видна уже следующему сообщению.
#[tokio::test]
async fn test_registration_visible_to_next_message() {
    let (_hub, publisher, subscriber) = setup(6);
    let (first, first_messages) = collector();
    subscriber.register(&first, Some("a")).await.unwrap();

    publisher.publish(&mut Event::new("a"), None).await.unwrap();
    wait_for(&first_messages, 1).await;

    let (second, second_messages) = collector();
    subscriber.register(&second, Some("b")).await.unwrap();
    publisher.publish(&mut Event::new("b"), None).await.unwrap();
    wait_for(&second_messages, 1).await;
}

/// Тест проверяет остановку: после `shutdown` цикл завершён, а
/// регистрация отвергается.
#[tokio::test]
async fn test_shutdown_is_prompt() {
    let (_hub, _publisher, subscriber) = setup(7);
    tokio::time::timeout(Duration::from_millis(500), subscriber.shutdown())
        .await
        .unwrap();
    assert_eq!(subscriber.state(), SubscriberState::Stopped);
}

/// Тест проверяет пул поверх хаба: один подписчик на адрес, доставка
/// через него, `close_all`.
#[tokio::test]
async fn test_pool_end_to_end() {
    let hub = MemoryHub::default();
    let pool = SubscriberPool::with_connector(Arc::new(hub.clone()), fast_config());
    let publisher = Publisher::with_transport(Arc::new(hub.bind(10133).unwrap()));

    let subscriber = pool.get(None, None).await.unwrap();
    let same = pool.get(Some("localhost"), None).await.unwrap();
    assert!(Arc::ptr_eq(&subscriber, &same));

    let (cb, messages) = collector();
    subscriber.register(&cb, None).await.unwrap();
    publisher.publish(&mut Event::new("tick"), None).await.unwrap();
    wait_for(&messages, 1).await;

    pool.close_all().await;
    assert!(!subscriber.is_running());
}

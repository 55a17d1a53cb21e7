use std::collections::HashSet;
use std::time::Duration;

use arachne_core::broker::Broker;
use arachne_db::{Database, PgBroker};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn test_incr_starts_from_zero() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    assert_eq!(broker.incr("urls_found").await.unwrap(), 1);
    assert_eq!(broker.incr("urls_found").await.unwrap(), 2);
    assert_eq!(broker.get("urls_found").await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn test_concurrent_incr_loses_nothing() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                broker.incr("counter").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(broker.get("counter").await.unwrap().as_deref(), Some("80"));
}

#[tokio::test]
async fn test_set_add_admits_each_member_once() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            broker.set_add("visited_urls", "https://a.com/").await.unwrap()
        }));
    }
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert!(broker.set_contains("visited_urls", "https://a.com/").await.unwrap());
    assert!(!broker.set_contains("visited_urls", "https://b.com/").await.unwrap());
    assert_eq!(broker.set_card("visited_urls").await.unwrap(), 1);
}

#[tokio::test]
async fn test_queue_is_fifo() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    for item in ["a", "b", "c"] {
        broker.push("explored_queue", item).await.unwrap();
    }
    assert_eq!(broker.queue_len("explored_queue").await.unwrap(), 3);

    let timeout = Duration::from_millis(100);
    assert_eq!(broker.pop_blocking("explored_queue", timeout).await.unwrap().as_deref(), Some("a"));
    assert_eq!(broker.pop_blocking("explored_queue", timeout).await.unwrap().as_deref(), Some("b"));
    assert_eq!(broker.pop_blocking("explored_queue", timeout).await.unwrap().as_deref(), Some("c"));
    assert_eq!(broker.queue_len("explored_queue").await.unwrap(), 0);
}

#[tokio::test]
async fn test_pop_times_out_on_empty_queue() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool).with_poll_interval(Duration::from_millis(20));

    let started = std::time::Instant::now();
    let popped = broker
        .pop_blocking("exploit_queue", Duration::from_millis(150))
        .await
        .unwrap();

    assert!(popped.is_none());
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_pop_waits_for_late_push() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool).with_poll_interval(Duration::from_millis(20));

    let pusher = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        pusher.push("exploit_queue", "late").await.unwrap();
    });

    let popped = broker
        .pop_blocking("exploit_queue", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(popped.as_deref(), Some("late"));
}

#[tokio::test]
async fn test_each_item_popped_exactly_once() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool).with_poll_interval(Duration::from_millis(10));

    for i in 0..40 {
        broker.push("explored_queue", &i.to_string()).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(item) = broker
                .pop_blocking("explored_queue", Duration::from_millis(100))
                .await
                .unwrap()
            {
                got.push(item);
            }
            got
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
}

#[tokio::test]
async fn test_stream_preserves_append_order() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    let first = broker.stream_append("results_stream", "one").await.unwrap();
    let second = broker.stream_append("results_stream", "two").await.unwrap();
    broker.stream_append("other_stream", "x").await.unwrap();
    assert!(second > first);

    let entries = broker.stream_range("results_stream").await.unwrap();
    let payloads: Vec<_> = entries.iter().map(|e| e.payload.as_str()).collect();
    assert_eq!(payloads, vec!["one", "two"]);
    assert_eq!(entries[0].id, first);
}

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    let mut rx = broker.subscribe("scraper_control").await.unwrap();
    broker
        .publish("scraper_control", r#"{"command":"stop"}"#)
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification not delivered");
    assert_eq!(message.as_deref(), Some(r#"{"command":"stop"}"#));
}

#[tokio::test]
async fn test_delete_clears_every_kind_of_key() {
    let (pool, _container) = setup_test_db().await;
    let broker = PgBroker::new(pool);

    broker.set("stop_signal", "1").await.unwrap();
    broker.set_add("visited_urls", "https://a.com/").await.unwrap();
    broker.push("explored_queue", "item").await.unwrap();
    broker.stream_append("results_stream", "r").await.unwrap();

    for key in ["stop_signal", "visited_urls", "explored_queue", "results_stream"] {
        broker.delete(key).await.unwrap();
    }

    assert_eq!(broker.get("stop_signal").await.unwrap(), None);
    assert_eq!(broker.set_card("visited_urls").await.unwrap(), 0);
    assert_eq!(broker.queue_len("explored_queue").await.unwrap(), 0);
    assert!(broker.stream_range("results_stream").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_overwrites_value() {
    let (pool, _container) = setup_test_db().await;
    let broker = Database::from_pool(pool).broker();

    broker.set("stop_signal", "0").await.unwrap();
    broker.set("stop_signal", "1").await.unwrap();
    assert_eq!(broker.get("stop_signal").await.unwrap().as_deref(), Some("1"));
}

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout};

use super::hub::Hub;
use super::message::{Delivery, EndReason, Retired, TopicCommand};
use super::store::MessageStore;
use super::{Broker, TopicItem};
use crate::client::ListenerId;
use crate::config::BrokerSettings;

fn bodies(items: &[TopicItem]) -> Vec<&str> {
    items.iter().map(|item| item.body.as_str()).collect()
}

fn fast_settings() -> BrokerSettings {
    BrokerSettings {
        gc_interval_ms: 50,
        ..BrokerSettings::default()
    }
}

async fn wait_until_retired(broker: &Broker, topic: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while broker.topics().await.unwrap().iter().any(|name| name == topic) {
        assert!(Instant::now() < deadline, "{topic} was never retired");
        sleep(Duration::from_millis(50)).await;
    }
}

fn next_batch(delivery: Option<Delivery>) -> Vec<TopicItem> {
    match delivery {
        Some(Delivery::Batch(items)) => items,
        other => panic!("Expected a batch, got {other:?}"),
    }
}

#[test]
fn test_store_new_is_empty() {
    let store = MessageStore::new(Duration::from_secs(1), 1);
    assert!(store.is_empty());
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn test_first_message_id_is_one() {
    let broker = Broker::default();
    assert_eq!(broker.last_message_id("ids").await.unwrap(), 0);

    assert_eq!(broker.push("ids", "a").await.unwrap(), 1);
    assert_eq!(broker.push("ids", "b").await.unwrap(), 2);
    assert_eq!(broker.push("ids", "c").await.unwrap(), 3);
    assert_eq!(broker.last_message_id("ids").await.unwrap(), 3);
}

#[tokio::test]
async fn test_topics_are_numbered_independently() {
    let broker = Broker::default();
    broker.push("left", "a").await.unwrap();
    broker.push("left", "b").await.unwrap();

    assert_eq!(broker.push("right", "a").await.unwrap(), 1);
    assert_eq!(
        broker.topics().await.unwrap(),
        vec!["left".to_string(), "right".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_get_gapless_ids() {
    let broker = Broker::default();
    let base = broker.last_message_id("concurrent").await.unwrap();

    let pushes = (0..200).map(|i| {
        let broker = broker.clone();
        async move { broker.push("concurrent", format!("m{i}")).await.unwrap() }
    });
    let mut ids = join_all(pushes).await;
    ids.sort_unstable();

    let expected: Vec<u64> = (base + 1..=base + 200).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_pull_returns_whole_snapshot_in_order() {
    let broker = Broker::default();
    for body in ["a", "b", "c"] {
        broker.push("snapshot", body).await.unwrap();
    }

    let items = broker
        .pull("snapshot", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(bodies(&items), vec!["a", "b", "c"]);
    assert_eq!(
        items.iter().map(|i| i.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // a pull does not consume the retained messages
    let again = broker
        .pull("snapshot", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(again.len(), 3);
}

#[tokio::test]
async fn test_pull_since_filters_by_id() {
    let broker = Broker::default();
    let k = broker.push("since", "a").await.unwrap();

    let empty = broker
        .pull_since("since", Duration::from_millis(50), k)
        .await
        .unwrap();
    assert!(empty.is_empty());

    broker.push("since", "b").await.unwrap();
    let items = broker
        .pull_since("since", Duration::from_millis(50), k)
        .await
        .unwrap();
    assert_eq!(bodies(&items), vec!["b"]);

    let all = broker
        .pull_since("since", Duration::from_millis(50), 0)
        .await
        .unwrap();
    assert_eq!(bodies(&all), vec!["a", "b"]);
}

#[tokio::test]
async fn test_pending_pull_since_is_fulfilled_by_next_push() {
    let broker = Broker::default();
    let k = broker.push("since_wait", "a").await.unwrap();

    let puller = {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker
                .pull_since("since_wait", Duration::from_secs(2), k)
                .await
        })
    };
    sleep(Duration::from_millis(50)).await;
    broker.push("since_wait", "b").await.unwrap();

    let items = puller.await.unwrap().unwrap();
    assert_eq!(bodies(&items), vec!["b"]);
}

#[tokio::test]
async fn test_pending_pull_gets_only_the_next_message() {
    let broker = Broker::default();

    let puller = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.pull("isolation", Duration::from_secs(2)).await })
    };
    sleep(Duration::from_millis(50)).await;
    broker.push("isolation", "x").await.unwrap();
    broker.push("isolation", "y").await.unwrap();

    let items = puller.await.unwrap().unwrap();
    assert_eq!(bodies(&items), vec!["x"]);

    // an immediate pull sees the backlog
    let backlog = broker
        .pull("isolation", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(bodies(&backlog), vec!["x", "y"]);
}

#[tokio::test]
async fn test_one_push_fulfils_every_pending_pull() {
    let broker = Broker::default();

    let pullers: Vec<_> = (0..20)
        .map(|_| {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pull("many", Duration::from_secs(2)).await })
        })
        .collect();
    sleep(Duration::from_millis(100)).await;
    broker.push("many", "hello").await.unwrap();

    for puller in pullers {
        let items = puller.await.unwrap().unwrap();
        assert_eq!(bodies(&items), vec!["hello"]);
    }
}

#[tokio::test]
async fn test_subscribe_fan_out_reaches_every_subscriber() {
    let broker = Broker::default();
    let mut first = broker.subscribe("fanout").await.unwrap();
    let mut second = broker.subscribe("fanout").await.unwrap();

    let id = broker.push("fanout", "one").await.unwrap();
    let a = next_batch(first.recv().await);
    let b = next_batch(second.recv().await);
    assert_eq!(a, b);
    assert_eq!(a[0].id, id);
    assert_eq!(a[0].body, "one");

    // neither subscriber was removed by the first delivery
    broker.push("fanout", "two").await.unwrap();
    assert_eq!(bodies(&next_batch(first.recv().await)), vec!["two"]);
    assert_eq!(bodies(&next_batch(second.recv().await)), vec!["two"]);
}

#[tokio::test]
async fn test_subscriber_does_not_see_backlog() {
    let broker = Broker::default();
    broker.push("late", "old").await.unwrap();

    let mut subscription = broker.subscribe("late").await.unwrap();
    broker.push("late", "new").await.unwrap();

    let items = next_batch(subscription.recv().await);
    assert_eq!(bodies(&items), vec!["new"]);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let broker = Broker::default();
    let mut leaving = broker.subscribe("idempotent").await.unwrap();
    let mut staying = broker.subscribe("idempotent").await.unwrap();

    broker.unsubscribe(leaving.handle()).await.unwrap();
    broker.unsubscribe(leaving.handle()).await.unwrap();
    leaving.unsubscribe().await.unwrap();

    assert_eq!(
        leaving.recv().await,
        Some(Delivery::End(EndReason::Cancelled))
    );
    assert_eq!(leaving.recv().await, None);

    broker.push("idempotent", "still here").await.unwrap();
    let items = next_batch(staying.recv().await);
    assert_eq!(bodies(&items), vec!["still here"]);
}

#[tokio::test]
async fn test_unknown_listener_unsubscribe_is_ignored() {
    let hub = Hub::spawn(BrokerSettings::default());
    let handle = hub.get_or_create("stale").await.unwrap();

    for _ in 0..2 {
        handle
            .send(TopicCommand::Unsubscribe {
                listener: ListenerId::new(),
            })
            .await
            .unwrap();
    }

    let (tx, rx) = oneshot::channel();
    handle
        .send(TopicCommand::LastMessageId { reply: tx })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Ok(0));

    let same = hub.get_or_create("stale").await.unwrap();
    assert!(same.same_actor(&handle));
}

#[tokio::test]
async fn test_count_limit_keeps_newest_messages() {
    let broker = Broker::new(BrokerSettings {
        max_retained_messages: 5,
        ..fast_settings()
    });
    for i in 1..=8 {
        broker.push("bounded", format!("m{i}")).await.unwrap();
    }

    let items = broker
        .pull("bounded", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(bodies(&items), vec!["m4", "m5", "m6", "m7", "m8"]);
}

#[tokio::test]
async fn test_age_limit_evicts_old_messages() {
    let broker = Broker::new(BrokerSettings {
        message_ttl_secs: 1,
        ..fast_settings()
    });
    broker.push("aging", "old").await.unwrap();
    sleep(Duration::from_millis(2100)).await;
    broker.push("aging", "fresh").await.unwrap();

    let items = broker
        .pull("aging", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(bodies(&items), vec!["fresh"]);
}

#[tokio::test]
async fn test_pull_timeout_returns_promptly() {
    let broker = Broker::default();
    let wait = Duration::from_millis(200);

    let start = Instant::now();
    let items = broker.pull("quiet", wait).await.unwrap();
    let elapsed = start.elapsed();

    assert!(items.is_empty());
    assert!(elapsed >= wait, "returned early after {elapsed:?}");
    assert!(
        elapsed < wait + Duration::from_millis(300),
        "returned late after {elapsed:?}"
    );
}

#[tokio::test]
async fn test_zero_timeout_is_raised_to_minimum() {
    let broker = Broker::default();

    let items = timeout(
        Duration::from_secs(1),
        broker.pull_since("instant", Duration::ZERO, 0),
    )
    .await
    .expect("zero timeout must not block indefinitely")
    .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_topic_keeps_working_after_timed_out_pulls() {
    let broker = Broker::default();
    for _ in 0..5 {
        let items = broker
            .pull("timeouts", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    // let the background cancellations land
    sleep(Duration::from_millis(50)).await;
    let id = broker.push("timeouts", "after").await.unwrap();
    let items = broker
        .pull_since("timeouts", Duration::from_millis(50), id - 1)
        .await
        .unwrap();
    assert_eq!(bodies(&items), vec!["after"]);
}

#[tokio::test]
async fn test_idle_topic_is_retired_and_keeps_its_ids() {
    let broker = Broker::new(BrokerSettings {
        message_ttl_secs: 1,
        idle_topic_ttl_secs: 1,
        ..fast_settings()
    });
    assert_eq!(broker.push("idle", "a").await.unwrap(), 1);
    assert_eq!(broker.topics().await.unwrap(), vec!["idle".to_string()]);

    wait_until_retired(&broker, "idle").await;

    assert_eq!(broker.last_message_id("idle").await.unwrap(), 1);
    assert_eq!(broker.push("idle", "b").await.unwrap(), 2);
}

#[tokio::test]
async fn test_topic_with_subscriber_is_not_retired() {
    let broker = Broker::new(BrokerSettings {
        idle_topic_ttl_secs: 1,
        ..fast_settings()
    });
    let _subscription = broker.subscribe("busy").await.unwrap();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(broker.topics().await.unwrap(), vec!["busy".to_string()]);
}

#[tokio::test]
async fn test_topics_are_immortal_by_default() {
    let broker = Broker::new(fast_settings());
    broker.last_message_id("forever").await.unwrap();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(broker.topics().await.unwrap(), vec!["forever".to_string()]);
}

#[tokio::test]
async fn test_dropped_subscription_does_not_keep_topic_alive() {
    let broker = Broker::new(BrokerSettings {
        idle_topic_ttl_secs: 1,
        ..fast_settings()
    });
    let subscription = broker.subscribe("abandoned").await.unwrap();
    drop(subscription);

    wait_until_retired(&broker, "abandoned").await;
}

#[tokio::test]
async fn test_abandoned_pull_does_not_keep_topic_alive() {
    let broker = Broker::new(BrokerSettings {
        idle_topic_ttl_secs: 1,
        ..fast_settings()
    });
    // dropping the future skips the cancellation the facade sends on timeout
    let pending = timeout(
        Duration::from_millis(100),
        broker.pull("abandoned", Duration::from_secs(30)),
    )
    .await;
    assert!(pending.is_err());

    wait_until_retired(&broker, "abandoned").await;
}

#[tokio::test]
async fn test_subscriber_that_never_reads_is_cancelled() {
    let broker = Broker::new(BrokerSettings {
        subscriber_buffer: 3,
        ..fast_settings()
    });
    let mut slow = broker.subscribe("firehose").await.unwrap();
    let mut fast = broker.subscribe("firehose").await.unwrap();

    for i in 1..=10 {
        broker.push("firehose", format!("m{i}")).await.unwrap();
        assert_eq!(bodies(&next_batch(fast.recv().await)), vec![format!("m{i}")]);
    }

    for expected in ["m1", "m2", "m3"] {
        assert_eq!(bodies(&next_batch(slow.recv().await)), vec![expected]);
    }
    assert_eq!(
        slow.recv().await,
        Some(Delivery::End(EndReason::Cancelled))
    );
    assert_eq!(slow.recv().await, None);
}

#[tokio::test]
async fn test_retired_actor_rejects_commands_on_stale_handle() {
    let hub = Hub::spawn(BrokerSettings {
        idle_topic_ttl_secs: 1,
        ..fast_settings()
    });
    let stale = hub.get_or_create("stale").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !hub.topics().await.unwrap().is_empty() {
        assert!(Instant::now() < deadline, "topic was never retired");
        sleep(Duration::from_millis(50)).await;
    }

    let (reply, rx) = oneshot::channel();
    stale
        .send(TopicCommand::Push {
            body: "late".to_string(),
            reply,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err(Retired));

    let (waiter, rx) = oneshot::channel();
    stale
        .send(TopicCommand::Pull {
            listener: ListenerId::new(),
            since: None,
            waiter,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err(Retired));

    let (feed, _feed_rx) = mpsc::channel(2);
    let (reply, rx) = oneshot::channel();
    stale
        .send(TopicCommand::Subscribe {
            listener: ListenerId::new(),
            feed,
            reply,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err(Retired));

    let fresh = hub.get_or_create("stale").await.unwrap();
    assert!(!fresh.same_actor(&stale));
}

//! Broker facade
//!
//! `Broker` is the client API. Each call resolves the topic through the hub
//! and then performs one request/reply round trip with the topic actor.
//!
//! Concurrency and usage notes:
//! - `Broker` is a cheap handle; clone it freely. Dropping every clone stops
//!   the hub, and topic actors stop once nothing refers to them any more.
//! - All methods need a running tokio runtime.
//! - `pull`/`pull_since` race the actor's delivery against a deadline. When
//!   the deadline wins the waiter is cancelled in the background and an empty
//!   batch is returned; a timeout is not an error.
//! - `Err(BrokerError)` only means an actor task is gone.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::broker::hub::{Hub, HubHandle};
use crate::broker::message::{Delivery, MessageId, Reply, Retired, TopicCommand, TopicItem};
use crate::broker::topic::TopicHandle;
use crate::client::{ListenerId, Subscription, SubscriptionHandle};
use crate::config::BrokerSettings;
use crate::utils::BrokerError;

#[derive(Debug, Clone)]
pub struct Broker {
    hub: HubHandle,
    min_pull_timeout: Duration,
    subscriber_buffer: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    /// Starts the topic registry. Topics are created lazily on first use.
    pub fn new(settings: BrokerSettings) -> Self {
        let min_pull_timeout = settings.min_pull_timeout();
        let subscriber_buffer = settings.subscriber_buffer();
        Self {
            hub: Hub::spawn(settings),
            min_pull_timeout,
            subscriber_buffer,
        }
    }

    /// Registers a continuous listener. It receives every message published
    /// from now on until it is unsubscribed, or until it leaves
    /// `subscriber_buffer` deliveries unread.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        let listener = ListenerId::new();
        // one extra slot for the end marker
        let (feed_tx, feed_rx) = mpsc::channel(self.subscriber_buffer + 1);

        let ((), handle) = self
            .request(topic, |reply| TopicCommand::Subscribe {
                listener,
                feed: feed_tx.clone(),
                reply,
            })
            .await?;
        debug!(topic, %listener, "subscribed");

        Ok(Subscription::new(
            SubscriptionHandle::new(listener, handle),
            feed_rx,
        ))
    }

    /// Safe to call any number of times.
    pub async fn unsubscribe(&self, subscription: &SubscriptionHandle) -> Result<(), BrokerError> {
        subscription.unsubscribe().await
    }

    /// Returns every retained message, or waits up to `timeout` for the next
    /// one to be published.
    pub async fn pull(&self, topic: &str, timeout: Duration) -> Result<Vec<TopicItem>, BrokerError> {
        self.pull_with(topic, timeout, None).await
    }

    /// Like `pull`, but only messages with an id greater than `since` count.
    pub async fn pull_since(
        &self,
        topic: &str,
        timeout: Duration,
        since: MessageId,
    ) -> Result<Vec<TopicItem>, BrokerError> {
        self.pull_with(topic, timeout, Some(since)).await
    }

    /// Publishes `body` and returns the id the topic assigned to it.
    pub async fn push(&self, topic: &str, body: impl Into<String>) -> Result<MessageId, BrokerError> {
        let body = body.into();
        let (item, _) = self
            .request(topic, |reply| TopicCommand::Push {
                body: body.clone(),
                reply,
            })
            .await?;
        Ok(item.id)
    }

    /// The id most recently assigned in `topic`, `0` if nothing was published yet.
    pub async fn last_message_id(&self, topic: &str) -> Result<MessageId, BrokerError> {
        let (id, _) = self
            .request(topic, |reply| TopicCommand::LastMessageId { reply })
            .await?;
        Ok(id)
    }

    /// Names of the topics currently registered, sorted.
    pub async fn topics(&self) -> Result<Vec<String>, BrokerError> {
        self.hub.topics().await
    }

    async fn pull_with(
        &self,
        topic: &str,
        timeout: Duration,
        since: Option<MessageId>,
    ) -> Result<Vec<TopicItem>, BrokerError> {
        let deadline = Instant::now() + timeout.max(self.min_pull_timeout);

        loop {
            let handle = self.hub.get_or_create(topic).await?;
            let listener = ListenerId::new();
            let (waiter, delivery) = oneshot::channel();
            handle
                .send(TopicCommand::Pull {
                    listener,
                    since,
                    waiter,
                })
                .await?;

            tokio::select! {
                reply = delivery => match reply {
                    Ok(Ok(Delivery::Batch(items))) => return Ok(items),
                    Ok(Ok(Delivery::End(_))) => return Ok(Vec::new()),
                    Ok(Err(Retired)) => trace!(topic, "topic retired, resolving again"),
                    Err(_) => return Err(BrokerError::TopicUnavailable(topic.to_string())),
                },
                _ = time::sleep_until(deadline) => {
                    trace!(topic, %listener, "pull timed out");
                    // the actor may be delivering right now; don't wait for it
                    tokio::spawn(async move {
                        let _ = handle.send(TopicCommand::Unsubscribe { listener }).await;
                    });
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// One round trip with the actor for `topic`, retried if the actor turns
    /// out to have been retired in the meantime.
    async fn request<T>(
        &self,
        topic: &str,
        mut command: impl FnMut(Reply<T>) -> TopicCommand,
    ) -> Result<(T, TopicHandle), BrokerError> {
        loop {
            let handle = self.hub.get_or_create(topic).await?;
            let (tx, rx) = oneshot::channel();
            handle.send(command(tx)).await?;

            match rx.await {
                Ok(Ok(value)) => return Ok((value, handle)),
                Ok(Err(Retired)) => trace!(topic, "topic retired, resolving again"),
                Err(_) => return Err(BrokerError::TopicUnavailable(topic.to_string())),
            }
        }
    }
}

use std::fmt;

use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use crate::broker::message::{Delivery, TopicCommand};
use crate::broker::topic::TopicHandle;
use crate::utils::BrokerError;

/// Identifies one listener (a subscription or a pending pull) within its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cloneable reference to a subscription, enough to cancel it from anywhere.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    listener: ListenerId,
    topic: TopicHandle,
}

impl SubscriptionHandle {
    pub(crate) fn new(listener: ListenerId, topic: TopicHandle) -> Self {
        Self { listener, topic }
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn topic(&self) -> &str {
        self.topic.name()
    }

    /// Removes the listener from its topic. The feed then yields
    /// `Delivery::End(EndReason::Cancelled)`. Repeated calls are no-ops.
    pub async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.topic
            .send(TopicCommand::Unsubscribe {
                listener: self.listener,
            })
            .await
    }
}

/// A continuous feed of every message published to a topic after it was created.
///
/// The caller should eventually unsubscribe; a dropped `Subscription` is only
/// noticed by its topic on the next publish or GC tick. A subscription that
/// leaves `broker.subscriber_buffer` deliveries unread is cancelled by its topic.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    feed: Receiver<Delivery>,
    ended: bool,
}

impl Subscription {
    pub(crate) fn new(handle: SubscriptionHandle, feed: Receiver<Delivery>) -> Self {
        Self {
            handle,
            feed,
            ended: false,
        }
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    /// Waits for the next delivery. After a `Delivery::End`, or if the topic
    /// actor is gone, this returns `None` forever.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.ended {
            return None;
        }

        let delivery = self.feed.recv().await;
        if !matches!(delivery, Some(Delivery::Batch(_))) {
            self.ended = true;
        }
        delivery
    }

    pub async fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.handle.unsubscribe().await
    }
}

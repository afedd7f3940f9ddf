//! Message definitions for the broker
//!
//! `TopicItem` is the immutable record stored in a topic's retention queue
//! and handed to listeners. `Delivery` is what a listener receives: either a
//! batch of items or an explicit end-of-stream marker.
//!
//! The command types at the bottom are the request/reply envelopes the facade
//! exchanges with the hub and topic actors. They never leave the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::broker::topic::TopicHandle;
use crate::client::ListenerId;

/// Per-topic message sequence number. The first published message is `1`.
pub type MessageId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicItem {
    pub id: MessageId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl TopicItem {
    pub fn new(id: MessageId, body: String) -> Self {
        Self {
            id,
            body,
            created_at: Utc::now(),
        }
    }
}

/// What a listener receives from its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Batch(Vec<TopicItem>),
    /// Terminal. Nothing follows it.
    End(EndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Fulfilled,
    Cancelled,
}

/// Reply from a topic actor that has been torn down. The caller resolves the
/// topic again and retries against the fresh actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retired;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, Retired>>;

pub(crate) enum TopicCommand {
    Subscribe {
        listener: ListenerId,
        feed: mpsc::Sender<Delivery>,
        reply: Reply<()>,
    },
    Unsubscribe {
        listener: ListenerId,
    },
    /// `since: None` is a plain Pull, `Some(id)` a PullSince.
    Pull {
        listener: ListenerId,
        since: Option<MessageId>,
        waiter: Reply<Delivery>,
    },
    Push {
        body: String,
        reply: Reply<TopicItem>,
    },
    LastMessageId {
        reply: Reply<MessageId>,
    },
}

pub(crate) enum HubRequest {
    GetOrCreate {
        name: String,
        reply: oneshot::Sender<TopicHandle>,
    },
    Retire {
        handle: TopicHandle,
        last_message_id: MessageId,
        /// `false` if the hub no longer maps the name to this actor.
        reply: oneshot::Sender<bool>,
    },
    Topics {
        reply: oneshot::Sender<Vec<String>>,
    },
}

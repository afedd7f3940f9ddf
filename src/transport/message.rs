//! JSON frames exchanged over the WebSocket connection, tagged by `"type"`.

use serde::{Deserialize, Serialize};

use crate::broker::{MessageId, TopicItem};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Push {
        topic: String,
        message: String,
    },
    /// With `since` this is a PullSince.
    Pull {
        topic: String,
        timeout_ms: Option<u64>,
        since: Option<MessageId>,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    LastMessageId {
        topic: String,
    },
    Topics,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pushed {
        topic: String,
        id: MessageId,
    },
    Messages {
        topic: String,
        items: Vec<TopicItem>,
    },
    Timeout {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    LastMessageId {
        topic: String,
        id: MessageId,
    },
    Topics {
        names: Vec<String>,
    },
    Error {
        message: String,
    },
}

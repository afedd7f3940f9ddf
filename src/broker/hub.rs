//! Topic registry
//!
//! The hub is a single task that maps topic names to topic actors. Every
//! lookup goes through its request queue, so two callers asking for the same
//! unknown name at the same time still end up with one actor.
//!
//! Retiring an idle topic frees its actor and everything the actor holds, but
//! the hub keeps the topic's last id so a later topic with the same name
//! carries on from it. That is one `u64` per distinct retired name, kept for
//! the life of the broker; dropping it would let ids repeat under a cursor
//! that outlived the topic.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::broker::message::{HubRequest, MessageId};
use crate::broker::topic::{Topic, TopicHandle};
use crate::config::BrokerSettings;
use crate::utils::BrokerError;

/// Client side of the hub's request queue.
#[derive(Debug, Clone)]
pub(crate) struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    pub(crate) fn new(requests: mpsc::Sender<HubRequest>) -> Self {
        Self { requests }
    }

    pub(crate) async fn get_or_create(&self, name: &str) -> Result<TopicHandle, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.call(HubRequest::GetOrCreate {
            name: name.to_string(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::HubUnavailable)
    }

    pub(crate) async fn topics(&self) -> Result<Vec<String>, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.call(HubRequest::Topics { reply: tx }).await?;
        rx.await.map_err(|_| BrokerError::HubUnavailable)
    }

    async fn call(&self, request: HubRequest) -> Result<(), BrokerError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| BrokerError::HubUnavailable)
    }
}

pub(crate) struct Hub {
    topics: HashMap<String, TopicHandle>,
    /// Last ids of torn-down topics, handed to their successors.
    retired_ids: HashMap<String, MessageId>,
    settings: BrokerSettings,
    requests: mpsc::WeakSender<HubRequest>,
}

impl Hub {
    pub(crate) fn spawn(settings: BrokerSettings) -> HubHandle {
        let (tx, rx) = mpsc::channel(settings.command_buffer());
        let hub = Hub {
            topics: HashMap::new(),
            retired_ids: HashMap::new(),
            settings,
            requests: tx.downgrade(),
        };
        tokio::spawn(hub.run(rx));
        HubHandle::new(tx)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<HubRequest>) {
        while let Some(request) = requests.recv().await {
            self.handle(request);
        }
        debug!(topics = self.topics.len(), "topic registry stopped");
    }

    fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::GetOrCreate { name, reply } => {
                let handle = self.get_or_create(name);
                let _ = reply.send(handle);
            }
            HubRequest::Retire {
                handle,
                last_message_id,
                reply,
            } => {
                let _ = reply.send(self.retire(&handle, last_message_id));
            }
            HubRequest::Topics { reply } => {
                let mut names: Vec<String> = self.topics.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }
        }
    }

    fn get_or_create(&mut self, name: String) -> TopicHandle {
        if let Some(handle) = self.topics.get(&name) {
            return handle.clone();
        }

        let last_message_id = self.retired_ids.remove(&name).unwrap_or(0);
        // topics only call back into the hub when they can be torn down
        let hub = self
            .settings
            .idle_topic_ttl()
            .map(|_| self.requests.clone());
        let handle = Topic::spawn(&name, &self.settings, last_message_id, hub);
        debug!(topic = %name, last_message_id, "topic created");

        self.topics.insert(name, handle.clone());
        handle
    }

    fn retire(&mut self, handle: &TopicHandle, last_message_id: MessageId) -> bool {
        let registered = self
            .topics
            .get(handle.name())
            .is_some_and(|current| current.same_actor(handle));
        if !registered {
            return false;
        }

        self.topics.remove(handle.name());
        self.retired_ids
            .insert(handle.name().to_string(), last_message_id);
        true
    }
}

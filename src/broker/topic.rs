//! Topic actor
//!
//! One task per topic name. It owns the retention queue, the continuous
//! subscribers and the pending one-shot waiters, and it is the only code that
//! ever touches them. Commands arrive over a bounded queue and are handled one
//! at a time; the retention GC tick is just another branch of the same
//! `select!`, so GC and command handling never overlap.
//!
//! A listener is written to only while it is registered here. Removal and the
//! final `Delivery::End` happen in the same step, so there is no window where
//! a removed listener can still be fed.
//!
//! Subscriber feeds are bounded and never awaited. The last free slot of a
//! feed is kept for the end marker: a subscriber that has fallen that far
//! behind is removed and sees `Delivery::End(EndReason::Cancelled)` once it
//! has read what is already queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::broker::message::{
    Delivery, EndReason, HubRequest, MessageId, Reply, Retired, TopicCommand, TopicItem,
};
use crate::broker::store::MessageStore;
use crate::client::ListenerId;
use crate::config::BrokerSettings;
use crate::utils::BrokerError;

/// Cloneable address of a running topic actor.
#[derive(Debug, Clone)]
pub(crate) struct TopicHandle {
    name: Arc<str>,
    commands: mpsc::Sender<TopicCommand>,
}

impl TopicHandle {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn send(&self, command: TopicCommand) -> Result<(), BrokerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BrokerError::TopicUnavailable(self.name.to_string()))
    }

    /// True if both handles address the same actor.
    pub(crate) fn same_actor(&self, other: &TopicHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }
}

pub(crate) struct Topic {
    name: Arc<str>,
    store: MessageStore,
    last_message_id: MessageId,
    subscribers: HashMap<ListenerId, mpsc::Sender<Delivery>>,
    waiters: HashMap<ListenerId, Reply<Delivery>>,
    idle_ttl: Option<Duration>,
    last_activity: Instant,
    // weak so that neither the hub nor the actor keeps itself alive
    hub: Option<mpsc::WeakSender<HubRequest>>,
    commands: mpsc::WeakSender<TopicCommand>,
    retired: bool,
}

impl Topic {
    /// Starts the actor and returns its handle. Ids continue after
    /// `last_message_id`, which is `0` for a brand new topic.
    pub(crate) fn spawn(
        name: &str,
        settings: &BrokerSettings,
        last_message_id: MessageId,
        hub: Option<mpsc::WeakSender<HubRequest>>,
    ) -> TopicHandle {
        let (tx, rx) = mpsc::channel(settings.command_buffer());
        let name: Arc<str> = Arc::from(name);

        let topic = Topic::new(name.clone(), settings, last_message_id, hub, tx.downgrade());
        tokio::spawn(topic.run(rx, settings.gc_interval()));

        TopicHandle { name, commands: tx }
    }

    fn new(
        name: Arc<str>,
        settings: &BrokerSettings,
        last_message_id: MessageId,
        hub: Option<mpsc::WeakSender<HubRequest>>,
        commands: mpsc::WeakSender<TopicCommand>,
    ) -> Self {
        Topic {
            name,
            store: MessageStore::new(settings.message_ttl(), settings.max_retained_messages),
            last_message_id,
            subscribers: HashMap::new(),
            waiters: HashMap::new(),
            idle_ttl: settings.idle_topic_ttl(),
            last_activity: Instant::now(),
            hub,
            commands,
            retired: false,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<TopicCommand>, gc_interval: Duration) {
        let mut gc = time::interval(gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = gc.tick() => {
                    self.collect_garbage();
                    if self.is_idle() {
                        self.retire().await;
                    }
                }
            }
        }

        debug!(topic = %self.name, "topic actor stopped");
    }

    fn handle(&mut self, command: TopicCommand) {
        self.last_activity = Instant::now();
        if self.retired {
            return reject(command);
        }

        match command {
            TopicCommand::Subscribe {
                listener,
                feed,
                reply,
            } => {
                trace!(topic = %self.name, %listener, "subscribe");
                self.subscribers.insert(listener, feed);
                let _ = reply.send(Ok(()));
            }
            TopicCommand::Unsubscribe { listener } => self.unsubscribe(listener),
            TopicCommand::Pull {
                listener,
                since,
                waiter,
            } => self.pull(listener, since, waiter),
            TopicCommand::Push { body, reply } => self.push(body, reply),
            TopicCommand::LastMessageId { reply } => {
                let _ = reply.send(Ok(self.last_message_id));
            }
        }
    }

    /// Idempotent: unknown or already removed listeners are ignored.
    fn unsubscribe(&mut self, listener: ListenerId) {
        let end = Delivery::End(EndReason::Cancelled);
        if let Some(feed) = self.subscribers.remove(&listener) {
            trace!(topic = %self.name, %listener, "subscriber removed");
            let _ = feed.try_send(end);
        } else if let Some(waiter) = self.waiters.remove(&listener) {
            trace!(topic = %self.name, %listener, "waiter cancelled");
            let _ = waiter.send(Ok(end));
        } else {
            trace!(topic = %self.name, %listener, "stale unsubscribe ignored");
        }
    }

    fn pull(&mut self, listener: ListenerId, since: Option<MessageId>, waiter: Reply<Delivery>) {
        self.store.collect_garbage();

        let batch = match since {
            None => self.store.snapshot(),
            Some(since) => self.store.since(since),
        };

        if !batch.is_empty() {
            let _ = waiter.send(Ok(Delivery::Batch(batch)));
        } else if !waiter.is_closed() {
            trace!(topic = %self.name, %listener, ?since, "waiting for next publish");
            self.waiters.insert(listener, waiter);
        }
    }

    fn push(&mut self, body: String, reply: Reply<TopicItem>) {
        self.store.collect_garbage();

        self.last_message_id += 1;
        let item = TopicItem::new(self.last_message_id, body);
        self.store.push(item.clone());
        trace!(topic = %self.name, id = item.id, "published");

        // the publisher learns its id before any listener is fed
        let _ = reply.send(Ok(item.clone()));
        self.fan_out(&item);
    }

    fn fan_out(&mut self, item: &TopicItem) {
        let name = &self.name;
        self.subscribers.retain(|listener, feed| {
            if feed.is_closed() {
                debug!(topic = %name, %listener, "subscriber went away, dropping it");
                return false;
            }
            if feed.capacity() <= 1 {
                warn!(topic = %name, %listener, "subscriber fell behind, dropping it");
                let _ = feed.try_send(Delivery::End(EndReason::Cancelled));
                return false;
            }
            feed.try_send(Delivery::Batch(vec![item.clone()])).is_ok()
        });

        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Ok(Delivery::Batch(vec![item.clone()])));
        }
    }

    fn collect_garbage(&mut self) {
        let evicted = self.store.collect_garbage();
        if evicted > 0 {
            trace!(topic = %self.name, evicted, retained = self.store.len(), "retention gc");
        }

        // listeners whose receiving side is gone
        self.subscribers.retain(|_, feed| !feed.is_closed());
        self.waiters.retain(|_, waiter| !waiter.is_closed());
    }

    fn is_idle(&self) -> bool {
        let Some(ttl) = self.idle_ttl else {
            return false;
        };
        !self.retired
            && self.subscribers.is_empty()
            && self.waiters.is_empty()
            && self.store.is_empty()
            && self.last_activity.elapsed() >= ttl
    }

    /// Asks the hub to forget this topic. Once the hub agrees, every further
    /// command is answered with `Retired` so callers resolve the name again.
    async fn retire(&mut self) {
        let Some(hub) = self.hub.as_ref().and_then(|hub| hub.upgrade()) else {
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let (tx, rx) = oneshot::channel();
        let request = HubRequest::Retire {
            handle: TopicHandle {
                name: self.name.clone(),
                commands,
            },
            last_message_id: self.last_message_id,
            reply: tx,
        };
        if hub.send(request).await.is_err() {
            return;
        }
        drop(hub);

        if let Ok(true) = rx.await {
            self.retired = true;
            debug!(topic = %self.name, last_message_id = self.last_message_id, "idle topic retired");
        }
    }
}

fn reject(command: TopicCommand) {
    match command {
        TopicCommand::Subscribe { reply, .. } => {
            let _ = reply.send(Err(Retired));
        }
        // a retired topic has no listeners left to remove
        TopicCommand::Unsubscribe { .. } => {}
        TopicCommand::Pull { waiter, .. } => {
            let _ = waiter.send(Err(Retired));
        }
        TopicCommand::Push { reply, .. } => {
            let _ = reply.send(Err(Retired));
        }
        TopicCommand::LastMessageId { reply } => {
            let _ = reply.send(Err(Retired));
        }
    }
}

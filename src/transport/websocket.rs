use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::{Broker, Delivery};
use crate::client::SubscriptionHandle;
use crate::config::ServerSettings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{BrokerError, TransportError};

/// Used when a pull frame carries no `timeout_ms`.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// Frames queued for one client before its producers wait on the socket.
const OUTBOUND_BUFFER: usize = 256;

/// Binds `host:port` and serves WebSocket clients until the task is dropped.
pub async fn start_websocket_server(
    settings: &ServerSettings,
    broker: Broker,
) -> Result<(), TransportError> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "WebSocket server listening");

    serve(listener, broker, settings.clone()).await;
    Ok(())
}

/// Accept loop over an already bound listener. Only the connection and pull
/// limits of `settings` are used here.
pub async fn serve(listener: TcpListener, broker: Broker, settings: ServerSettings) {
    let permits = Arc::new(Semaphore::new(settings.max_connections.max(1)));
    let max_pending_pulls = settings.max_pending_pulls.max(1);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!(%peer, "Connection rejected: limit reached");
            continue;
        };

        let broker = broker.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, broker, max_pending_pulls).await {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Broker,
    max_pending_pulls: usize,
) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream).await?;
    let client_id = format!("client-{}", Uuid::new_v4());
    info!(%client_id, "client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    // broker → client
    let send_client_id = client_id.clone();
    let send_loop = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                debug!(client_id = %send_client_id, error = %e, "Failed to send message");
                break;
            }
        }
    });

    let mut session = Session {
        client_id: client_id.clone(),
        broker,
        outbound: tx,
        pulls: Arc::new(Semaphore::new(max_pending_pulls)),
        subscriptions: HashMap::new(),
    };

    // client → broker
    while let Some(Ok(frame)) = ws_receiver.next().await {
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }

        let Ok(text) = frame.to_text() else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => session.dispatch(msg).await,
            Err(err) => {
                let excerpt: String = text.chars().take(100).collect();
                warn!(%client_id, error = %err, frame = %excerpt, "Invalid client message");
                session
                    .reply(ServerMessage::Error {
                        message: format!("invalid message: {err}"),
                    })
                    .await;
            }
        }
    }

    session.close().await;
    send_loop.abort();
    info!(%client_id, "client disconnected");
    Ok(())
}

/// Per-connection state: the outbound queue, the pull budget and the live
/// subscriptions by topic along with their forwarder tasks.
struct Session {
    client_id: String,
    broker: Broker,
    outbound: mpsc::Sender<ServerMessage>,
    pulls: Arc<Semaphore>,
    subscriptions: HashMap<String, (SubscriptionHandle, JoinHandle<()>)>,
}

impl Session {
    async fn reply(&self, msg: ServerMessage) {
        let _ = self.outbound.send(msg).await;
    }

    async fn reply_result(&self, result: Result<ServerMessage, BrokerError>) {
        self.reply(result.unwrap_or_else(|e| ServerMessage::Error {
            message: e.to_string(),
        }))
        .await;
    }

    async fn dispatch(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Push { topic, message } => {
                let result = self.broker.push(&topic, message).await;
                self.reply_result(result.map(|id| ServerMessage::Pushed { topic, id }))
                    .await;
            }
            ClientMessage::Pull {
                topic,
                timeout_ms,
                since,
            } => self.pull(topic, timeout_ms, since).await,
            ClientMessage::Subscribe { topic } => self.subscribe(topic).await,
            ClientMessage::Unsubscribe { topic } => {
                match self.subscriptions.remove(&topic) {
                    // the forwarder reports `unsubscribed` once the feed ends
                    Some((handle, _)) => {
                        if let Err(e) = handle.unsubscribe().await {
                            self.reply(ServerMessage::Error {
                                message: e.to_string(),
                            })
                            .await;
                        }
                    }
                    None => debug!(client_id = %self.client_id, %topic, "not subscribed"),
                }
            }
            ClientMessage::LastMessageId { topic } => {
                let result = self.broker.last_message_id(&topic).await;
                self.reply_result(result.map(|id| ServerMessage::LastMessageId { topic, id }))
                    .await;
            }
            ClientMessage::Topics => {
                let result = self.broker.topics().await;
                self.reply_result(result.map(|names| ServerMessage::Topics { names }))
                    .await;
            }
        }
    }

    /// Pulls run in their own task so a long wait does not hold up the
    /// connection. At most `max_pending_pulls` of them run at once.
    async fn pull(&self, topic: String, timeout_ms: Option<u64>, since: Option<u64>) {
        let Ok(permit) = self.pulls.clone().try_acquire_owned() else {
            warn!(client_id = %self.client_id, %topic, "pull rejected: too many pending pulls");
            return self
                .reply(ServerMessage::Error {
                    message: format!("too many pending pulls, {topic} not pulled"),
                })
                .await;
        };

        let broker = self.broker.clone();
        let outbound = self.outbound.clone();
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PULL_TIMEOUT);

        tokio::spawn(async move {
            let result = match since {
                Some(since) => broker.pull_since(&topic, timeout, since).await,
                None => broker.pull(&topic, timeout).await,
            };
            drop(permit);
            let msg = match result {
                Ok(items) if items.is_empty() => ServerMessage::Timeout { topic },
                Ok(items) => ServerMessage::Messages { topic, items },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            };
            let _ = outbound.send(msg).await;
        });
    }

    async fn subscribe(&mut self, topic: String) {
        // a finished forwarder means the topic cancelled the subscription
        let live = self
            .subscriptions
            .get(&topic)
            .is_some_and(|(_, forwarder)| !forwarder.is_finished());
        if live {
            debug!(client_id = %self.client_id, %topic, "already subscribed");
            return;
        }

        let mut subscription = match self.broker.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                return self
                    .reply(ServerMessage::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        };
        let handle = subscription.handle().clone();
        info!(client_id = %self.client_id, %topic, "subscribed");

        let outbound = self.outbound.clone();
        let feed_topic = topic.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(Delivery::Batch(items)) = subscription.recv().await {
                let msg = ServerMessage::Messages {
                    topic: feed_topic.clone(),
                    items,
                };
                if outbound.send(msg).await.is_err() {
                    let _ = subscription.unsubscribe().await;
                    return;
                }
            }
            let _ = outbound
                .send(ServerMessage::Unsubscribed { topic: feed_topic })
                .await;
        });
        self.subscriptions.insert(topic, (handle, forwarder));
    }

    async fn close(&mut self) {
        for (topic, (handle, _)) in self.subscriptions.drain() {
            if let Err(e) = handle.unsubscribe().await {
                debug!(client_id = %self.client_id, %topic, error = %e, "cleanup failed");
            }
        }
    }
}

//! # Tidings
//!
//! `tidings` is an in-process publish/subscribe broker built on tokio.
//! Callers publish text messages to named topics; other callers either
//! subscribe for a live feed or pull the retained messages (optionally only
//! those newer than a given id), waiting a bounded time for the next one if
//! nothing is buffered.
//!
//! ## Core Modules
//!
//! - `broker`: the topic registry, the per-topic actors and the `Broker` facade.
//! - `client`: subscription handles returned to callers.
//! - `config`: loading server and broker configuration.
//! - `transport`: a WebSocket front end that maps JSON frames onto `Broker` calls.
//! - `utils`: error types and logging setup.
//!
//! ```no_run
//! use std::time::Duration;
//! use tidings::Broker;
//!
//! # async fn demo() -> Result<(), tidings::BrokerError> {
//! let broker = Broker::default();
//! let id = broker.push("chat", "hello").await?;
//! let items = broker.pull_since("chat", Duration::from_secs(5), id - 1).await?;
//! assert_eq!(items[0].body, "hello");
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use broker::{Broker, Delivery, EndReason, MessageId, TopicItem};
pub use client::{Subscription, SubscriptionHandle};
pub use utils::{BrokerError, TransportError};

//! The broker: a registry of topic actors plus the client facade in front of it.
//!
//! - `engine`: `Broker`, the API callers use.
//! - `hub`: maps topic names to running topic actors.
//! - `topic`: the per-topic actor that owns listeners and retained messages.
//! - `store`: the bounded retention queue a topic keeps.
//! - `message`: message and command types.

pub mod engine;
pub(crate) mod hub;
pub mod message;
pub mod store;
pub(crate) mod topic;

pub use engine::Broker;
pub use message::{Delivery, EndReason, MessageId, TopicItem};

#[cfg(test)]
mod tests;

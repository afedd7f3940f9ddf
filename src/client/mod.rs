//! The `client` module defines the consumer side of a subscription.
//!
//! It provides `ListenerId`, which identifies a listener inside its topic,
//! and `Subscription`, the live feed handed out by `Broker::subscribe`.

pub mod subscription;
pub use subscription::{ListenerId, Subscription, SubscriptionHandle};

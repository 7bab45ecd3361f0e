//! Publish/subscribe message bus coupling independently written modules.

pub mod hub;
pub mod message;

pub use hub::{Callback, MessageBus, PublishReport, SubscriptionId};
pub use message::{Filter, Message};

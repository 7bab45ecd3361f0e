//! In-process publish/subscribe hub.
//!
//! [`MessageBus`] is a cheap cloneable handle; every module of an engine holds
//! a clone. `publish` runs matching subscribers synchronously on the calling
//! thread, in subscription order.
//!
//! The subscription table lock is never held while a callback runs, so a
//! subscriber may itself publish, subscribe or unsubscribe. A subscription
//! removed during a publish is not invoked for the remainder of it.
//! Subscriptions added during a publish see only later messages.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::message::{Filter, Message};
use crate::core::audit::{record_event, EngineEventKind, SharedEventSink};
use crate::core::{AppResult, BusError};

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Numeric value of the handle.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscriber callback. Errors and panics are contained by the bus.
pub type Callback = Arc<dyn Fn(&Message) -> AppResult<()> + Send + Sync>;

/// Delivery summary of one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that returned `Ok`.
    pub delivered: usize,
    /// Subscribers that returned an error or panicked.
    pub failed: usize,
}

impl PublishReport {
    /// Total subscribers invoked.
    #[must_use]
    pub const fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: Option<Filter>,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Synchronous publish/subscribe hub.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
    events: Option<SharedEventSink>,
}

impl MessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record failing subscribers into `events`.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Subscribe to every message.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) -> AppResult<()> + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    /// Subscribe to messages matching `filter`.
    pub fn subscribe_filtered<F>(&self, filter: Filter, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) -> AppResult<()> + Send + Sync + 'static,
    {
        self.insert(Some(filter), Arc::new(callback))
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// `BusError::NotFound` if the handle was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        let index = inner
            .subscriptions
            .iter()
            .position(|s| s.id == id)
            .ok_or(BusError::NotFound(id))?;
        inner.subscriptions.remove(index);
        tracing::debug!(subscription = %id, "unsubscribed");
        Ok(())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Deliver `message` to every matching subscriber before returning.
    ///
    /// A failing subscriber is logged and recorded, and delivery continues
    /// with the next one.
    pub fn publish(&self, message: &Message) -> PublishReport {
        let targets: Vec<(SubscriptionId, Callback)> = {
            let inner = self.inner.lock();
            inner
                .subscriptions
                .iter()
                .filter(|s| s.filter.as_ref().is_none_or(|f| f.matches(message)))
                .map(|s| (s.id, Arc::clone(&s.callback)))
                .collect()
        };

        let mut report = PublishReport::default();
        for (id, callback) in targets {
            if !self.is_subscribed(id) {
                continue;
            }
            let failure = match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(_) => Some("subscriber panicked".to_string()),
            };
            match failure {
                None => report.delivered += 1,
                Some(reason) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscription = %id,
                        message = %message,
                        reason = %reason,
                        "subscriber failed"
                    );
                    record_event(
                        self.events.as_ref(),
                        EngineEventKind::SubscriberFailed,
                        &id.to_string(),
                        Some(reason),
                    );
                }
            }
        }
        tracing::trace!(message = %message, delivered = report.delivered, "published");
        report
    }

    fn insert(&self, filter: Option<Filter>, callback: Callback) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscriptions.push(Subscription {
            id,
            filter,
            callback,
        });
        tracing::debug!(subscription = %id, "subscribed");
        id
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.lock().subscriptions.iter().any(|s| s.id == id)
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

//! Live event subscriber.
//!
//! DESIGN
//! ======
//! A feed listens to two event classes on a conversation-scoped push channel:
//! `<key>:messages` (added) and `<key>:messages:update` (updated). Handler
//! registration is scoped: `LiveSubscription` owns one handler pair and
//! deregisters both on drop, so every exit path releases them, re-subscription
//! included. `LiveSubscriber` holds at most one subscription and swaps it
//! whenever the channel reference or the chat keys change.
//!
//! Events are applied straight into the feed store in delivery order. Nothing
//! is buffered or reordered here.
//!
//! ERROR HANDLING
//! ==============
//! A missing channel is not an error: the feed stays history-only until a
//! channel shows up. Payloads that do not decode as a message are dropped with
//! a warning instead of poisoning the feed.

#[cfg(test)]
#[path = "subscriber_test.rs"]
mod subscriber_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::FeedStore;
use crate::error::FeedError;
use crate::message::Message;
use crate::target::{ChatKeys, ConversationKey};

// =============================================================================
// CHANNEL
// =============================================================================

/// Callback invoked with the raw payload of one pushed event.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Registration token returned by [`LiveChannel::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected push channel. Connection management lives behind this trait.
pub trait LiveChannel: Send + Sync {
    /// Register `handler` for events named `event`.
    fn on(&self, event: &str, handler: EventHandler) -> HandlerId;

    /// Remove a handler previously registered for `event`.
    fn off(&self, event: &str, id: HandlerId);
}

/// In-process channel that delivers emitted events synchronously, in order.
#[derive(Default)]
pub struct LocalChannel {
    handlers: Mutex<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
}

impl LocalChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every handler of `event`. Returns how many ran.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) -> usize {
        // Snapshot so handlers may (un)register without deadlocking.
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            map.get(event)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Number of handlers currently registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        let map = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(event).map_or(0, Vec::len)
    }
}

impl LiveChannel for LocalChannel {
    fn on(&self, event: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId::new();
        let mut map = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(event.to_owned()).or_default().push((id, handler));
        id
    }

    fn off(&self, event: &str, id: HandlerId) {
        let mut map = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = map.get_mut(event) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                map.remove(event);
            }
        }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Decode a pushed payload into a message.
///
/// # Errors
///
/// Returns [`FeedError::MalformedEvent`] if the payload is not a message.
pub fn decode_message(payload: &serde_json::Value) -> Result<Message, FeedError> {
    Message::deserialize(payload).map_err(|e| FeedError::MalformedEvent(e.to_string()))
}

/// One active handler pair. Dropping it deregisters both handlers.
pub struct LiveSubscription {
    channel: Arc<dyn LiveChannel>,
    keys: ChatKeys,
    added: HandlerId,
    updated: HandlerId,
}

impl LiveSubscription {
    /// Register the added/updated handlers for `keys`, writing into `store`.
    #[must_use]
    pub fn acquire(channel: Arc<dyn LiveChannel>, keys: ChatKeys, store: &FeedStore) -> Self {
        let added = channel.on(&keys.added, added_handler(store.clone(), keys.query.clone()));
        let updated = channel.on(&keys.updated, updated_handler(store.clone(), keys.query.clone()));
        debug!(key = %keys.query, "live subscription acquired");
        Self { channel, keys, added, updated }
    }

    #[must_use]
    pub fn keys(&self) -> &ChatKeys {
        &self.keys
    }

    fn is_for(&self, channel: &Arc<dyn LiveChannel>, keys: &ChatKeys) -> bool {
        Arc::ptr_eq(&self.channel, channel) && &self.keys == keys
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.channel.off(&self.keys.added, self.added);
        self.channel.off(&self.keys.updated, self.updated);
        debug!(key = %self.keys.query, "live subscription released");
    }
}

fn added_handler(store: FeedStore, key: ConversationKey) -> EventHandler {
    Arc::new(move |payload: &serde_json::Value| match decode_message(payload) {
        Ok(message) => store.insert_live(&key, message),
        Err(e) => warn!(%key, error = %e, "dropping malformed added event"),
    })
}

fn updated_handler(store: FeedStore, key: ConversationKey) -> EventHandler {
    Arc::new(move |payload: &serde_json::Value| match decode_message(payload) {
        Ok(message) => {
            store.replace_live(&key, message);
        }
        Err(e) => warn!(%key, error = %e, "dropping malformed updated event"),
    })
}

// =============================================================================
// SUBSCRIBER
// =============================================================================

/// Keeps at most one live subscription in step with the current channel and keys.
pub struct LiveSubscriber {
    store: FeedStore,
    active: Option<LiveSubscription>,
}

impl LiveSubscriber {
    #[must_use]
    pub fn new(store: FeedStore) -> Self {
        Self { store, active: None }
    }

    /// Bring the subscription in line with `channel` and `keys`.
    ///
    /// Same channel and keys: no-op. Otherwise the old handler pair is
    /// released first, then a new pair is acquired if a channel is present.
    /// Returns whether anything changed.
    pub fn sync(&mut self, channel: Option<&Arc<dyn LiveChannel>>, keys: &ChatKeys) -> bool {
        if let (Some(active), Some(channel)) = (&self.active, channel) {
            if active.is_for(channel, keys) {
                return false;
            }
        }
        let had_active = self.active.take().is_some();
        match channel {
            Some(channel) => {
                self.active = Some(LiveSubscription::acquire(Arc::clone(channel), keys.clone(), &self.store));
                true
            }
            None => {
                debug!(key = %keys.query, "no live channel; history only");
                had_active
            }
        }
    }

    /// Release the active subscription, if any.
    pub fn clear(&mut self) {
        self.active = None;
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_keys(&self) -> Option<&ChatKeys> {
        self.active.as_ref().map(LiveSubscription::keys)
    }
}

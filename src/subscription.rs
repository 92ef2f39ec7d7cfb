use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::payload;

/// Local identifier of a subscription, unique within its session.
///
/// Sent to the broker as the SUBSCRIBE `id` header (`sub-<n>`); MESSAGE
/// frames echo it back in their `subscription` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A handler with its payload type erased: decode the frame, then call the
/// typed callback.
pub(crate) type ErasedHandler = Arc<dyn Fn(&Frame) -> Result<(), DecodeError> + Send + Sync>;

pub(crate) fn typed_handler<T, F>(destination: String, handler: F) -> ErasedHandler
where
    T: DeserializeOwned + 'static,
    F: Fn(&str, T) + Send + Sync + 'static,
{
    Arc::new(move |frame: &Frame| {
        let value = payload::decode::<T>(frame)?;
        handler(&destination, value);
        Ok(())
    })
}

pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) wire_id: String,
    pub(crate) handler: ErasedHandler,
}

/// Subscriptions of one session, in registration order.
#[derive(Default)]
pub(crate) struct Registry {
    entries: BTreeMap<SubscriptionId, SubscriptionEntry>,
}

impl Registry {
    pub(crate) fn insert(&mut self, id: SubscriptionId, destination: String, handler: ErasedHandler) {
        let wire_id = id.to_string();
        self.entries.insert(
            id,
            SubscriptionEntry {
                destination,
                wire_id,
                handler,
            },
        );
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<SubscriptionEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn clear(&mut self) -> Vec<SubscriptionId> {
        let ids = self.entries.keys().copied().collect();
        self.entries.clear();
        ids
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn snapshot(&self) -> Vec<(SubscriptionId, String)> {
        self.entries
            .iter()
            .map(|(id, e)| (*id, e.destination.clone()))
            .collect()
    }

    /// Handlers a MESSAGE frame should reach.
    ///
    /// A `subscription` header selects exactly that subscription (or none,
    /// if it is no longer registered). Without one, every subscription on
    /// the frame's `destination` matches.
    pub(crate) fn matching(&self, frame: &Frame) -> Vec<(SubscriptionId, ErasedHandler)> {
        let pick = |(id, e): (&SubscriptionId, &SubscriptionEntry)| (*id, e.handler.clone());
        if let Some(sub) = frame.get_header("subscription") {
            return self
                .entries
                .iter()
                .filter(|(_, e)| e.wire_id == sub)
                .map(pick)
                .collect();
        }
        match frame.destination() {
            Some(dest) => self
                .entries
                .iter()
                .filter(|(_, e)| e.destination == dest)
                .map(pick)
                .collect(),
            None => Vec::new(),
        }
    }
}

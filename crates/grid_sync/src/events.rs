//! Typed session event bus
//!
//! Subscribers register a handler per bus and receive every session event in
//! subscription order. Subscribing returns a token; dropping interest is an
//! explicit `unsubscribe(token)`, so teardown stays deterministic.

use crate::types::RollbackReason;
use std::collections::BTreeMap;

/// Events published by a table session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    EditSubmitted {
        edit_id: String,
        table_id: String,
        row_id: String,
    },
    EditConfirmed {
        edit_id: String,
    },
    EditRejected {
        edit_id: String,
        error: Option<String>,
    },
    EditTimedOut {
        edit_id: String,
    },
    UpdateRolledBack {
        update_id: String,
        reason: RollbackReason,
    },
    RemoteChangeApplied {
        table_id: String,
        row_id: String,
        version: u64,
    },
    ConflictDetected {
        conflict_id: String,
    },
    ConflictResolved {
        conflict_id: String,
        value: serde_json::Value,
    },
    ConflictResolutionFailed {
        conflict_id: String,
        error: String,
    },
    CapacityWarning {
        pending: usize,
        limit: usize,
    },
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

type Handler = Box<dyn Fn(&SessionEvent) + Send>;

/// Ordered set of subscriber handles per session
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: BTreeMap<u64, Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns a token for later unsubscription
    pub fn subscribe(&mut self, handler: impl Fn(&SessionEvent) + Send + 'static) -> SubscriptionToken {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, Box::new(handler));
        SubscriptionToken(id)
    }

    /// Remove a handler. Returns false when the token was already disposed.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        self.subscribers.remove(&token.0).is_some()
    }

    /// Deliver an event to every subscriber, in subscription order
    pub fn emit(&self, event: &SessionEvent) {
        for handler in self.subscribers.values() {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let token = bus.subscribe(move |event| {
            if let SessionEvent::EditConfirmed { edit_id } = event {
                sink.lock().unwrap().push(edit_id.clone());
            }
        });

        bus.emit(&SessionEvent::EditConfirmed {
            edit_id: "e1".to_string(),
        });
        assert_eq!(seen.lock().unwrap().as_slice(), ["e1".to_string()]);

        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));

        bus.emit(&SessionEvent::EditConfirmed {
            edit_id: "e2".to_string(),
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_delivery_order_follows_subscription_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let sink = Arc::clone(&order);
            bus.subscribe(move |_| sink.lock().unwrap().push(tag));
        }

        bus.emit(&SessionEvent::CapacityWarning { pending: 1, limit: 1 });
        assert_eq!(order.lock().unwrap().as_slice(), ["first", "second", "third"]);
    }
}

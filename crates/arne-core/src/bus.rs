// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-writer fan-out for [`AgentEvent`]s.
//!
//! Delivery is synchronous on the loop task: subscribers observe events in
//! exactly the order the loop produced them, and the loop never runs ahead
//! of its subscribers.  A panicking subscriber is isolated; it cannot take
//! down the loop or starve the other subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::events::AgentEvent;

pub type Subscriber = Box<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<(u64, Arc<dyn Fn(&AgentEvent) + Send + Sync>)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns an id for [`EventBus::unsubscribe`].
    pub fn subscribe(&self, f: Subscriber) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::from(f)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Deliver one event to every subscriber, in subscription order.
    ///
    /// The subscriber list is snapshotted before delivery so a subscriber
    /// may itself emit (e.g. enqueue a steering message, which announces a
    /// queue change) without deadlocking the bus.
    pub fn emit(&self, event: &AgentEvent) {
        let subscribers = self.inner.lock().unwrap().subscribers.clone();
        for (id, f) in &subscribers {
            if catch_unwind(AssertUnwindSafe(|| f(event))).is_err() {
                warn!(subscriber = id, "subscriber panicked; event dropped for it");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoopState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state_event() -> AgentEvent {
        AgentEvent::StateChanged { state: LoopState::Idle }
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(Box::new(move |e| {
            if let AgentEvent::Error { message } = e {
                seen2.lock().unwrap().push(message.clone());
            }
        }));
        bus.emit(&AgentEvent::Error { message: "a".into() });
        bus.emit(&AgentEvent::Error { message: "b".into() });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = bus.subscribe(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.emit(&state_event());
        assert!(bus.unsubscribe(id));
        bus.emit(&state_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id), "double unsubscribe is a no-op");
    }

    #[test]
    fn panicking_subscriber_does_not_break_the_rest() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Box::new(|_| panic!("bad subscriber")));
        let count2 = count.clone();
        bus.subscribe(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.emit(&state_event());
        bus.emit(&state_event());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            bus.subscribe(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        bus.emit(&state_event());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(bus.subscriber_count(), 3);
    }
}

//! Synchronous publish/subscribe between effects and listeners
//!
//! Delivery is immediate and in subscription order. A listener that returns
//! an error or panics is logged and skipped; the remaining listeners still
//! receive the event and the emitter never sees the failure.

use crate::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Error type listeners may return
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback
pub type Listener = Arc<dyn Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync>;

/// An event delivered on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: Value,
    /// Epoch milliseconds at emission
    pub timestamp: i64,
}

#[derive(Clone)]
struct Subscription {
    id: u64,
    listener: Listener,
    once: bool,
}

#[derive(Default)]
struct BusInner {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

/// Event bus handle; clones share subscriptions
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by `on`/`once`
#[derive(Clone)]
pub struct Unsubscribe {
    bus: EventBus,
    event_type: String,
    id: u64,
}

impl Unsubscribe {
    /// Remove the subscription; returns false if it was already gone
    pub fn unsubscribe(&self) -> bool {
        self.bus.remove(&self.event_type, self.id)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every emission of `event_type`
    pub fn on<F>(&self, event_type: &str, listener: F) -> Unsubscribe
    where
        F: Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.add(event_type, Arc::new(listener), false)
    }

    /// Subscribe to the next emission of `event_type` only
    pub fn once<F>(&self, event_type: &str, listener: F) -> Unsubscribe
    where
        F: Fn(&BusEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.add(event_type, Arc::new(listener), true)
    }

    /// Deliver an event to the current subscribers of its type
    ///
    /// Returns the number of listeners that completed without error.
    pub fn emit(&self, event_type: &str, payload: Value) -> usize {
        let snapshot: Vec<Subscription> = {
            let Ok(mut subs) = self.inner.subscriptions.lock() else {
                return 0;
            };
            let Some(list) = subs.get_mut(event_type) else {
                return 0;
            };
            let snapshot = list.clone();
            list.retain(|s| !s.once);
            if list.is_empty() {
                subs.remove(event_type);
            }
            snapshot
        };

        let event = BusEvent {
            event_type: event_type.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        tracing::debug!(event = %event_type, listeners = snapshot.len(), "Emitting bus event");

        let mut delivered = 0;
        for sub in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (sub.listener)(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(event = %event_type, error = %err, "Bus listener failed");
                }
                Err(_) => {
                    tracing::warn!(event = %event_type, "Bus listener panicked");
                }
            }
        }
        delivered
    }

    /// Drop subscriptions for one event type, or all when `None`
    pub fn clear(&self, event_type: Option<&str>) {
        if let Ok(mut subs) = self.inner.subscriptions.lock() {
            match event_type {
                Some(t) => {
                    subs.remove(t);
                }
                None => subs.clear(),
            }
        }
    }

    /// Number of subscribers for an event type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .lock()
            .map(|subs| subs.get(event_type).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn add(&self, event_type: &str, listener: Listener, once: bool) -> Unsubscribe {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.inner.subscriptions.lock() {
            subs.entry(event_type.to_string())
                .or_default()
                .push(Subscription { id, listener, once });
        }
        Unsubscribe {
            bus: self.clone(),
            event_type: event_type.to_string(),
            id,
        }
    }

    fn remove(&self, event_type: &str, id: u64) -> bool {
        let Ok(mut subs) = self.inner.subscriptions.lock() else {
            return false;
        };
        let Some(list) = subs.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.remove(event_type);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (log.clone(), log)
    }

    #[test]
    fn test_fan_out_in_order() {
        let bus = EventBus::new();
        let (log, sink) = collector();
        let s1 = sink.clone();
        bus.on("SAVED", move |_| {
            s1.lock().unwrap().push("first".into());
            Ok(())
        });
        bus.on("SAVED", move |e| {
            sink.lock().unwrap().push(format!("second:{}", e.payload.get_path(&["id"])));
            Ok(())
        });

        let payload = Value::from(serde_json::json!({"id": 7}));
        assert_eq!(bus.emit("SAVED", payload), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second:7"]);
    }

    #[test]
    fn test_failing_listeners_do_not_stop_delivery() {
        let bus = EventBus::new();
        let (log, sink) = collector();
        bus.on("X", |_| Err("boom".into()));
        bus.on("X", |_| panic!("listener panic"));
        bus.on("X", move |_| {
            sink.lock().unwrap().push("ok".into());
            Ok(())
        });

        assert_eq!(bus.emit("X", Value::Null), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn test_once_and_unsubscribe() {
        let bus = EventBus::new();
        let (log, sink) = collector();
        let s1 = sink.clone();
        bus.once("PING", move |_| {
            s1.lock().unwrap().push("once".into());
            Ok(())
        });
        let handle = bus.on("PING", move |_| {
            sink.lock().unwrap().push("on".into());
            Ok(())
        });

        bus.emit("PING", Value::Null);
        bus.emit("PING", Value::Null);
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        bus.emit("PING", Value::Null);

        assert_eq!(*log.lock().unwrap(), vec!["once", "on", "on"]);
        assert_eq!(bus.listener_count("PING"), 0);
    }

    #[test]
    fn test_subscribe_during_emit_is_not_delivered() {
        let bus = EventBus::new();
        let (log, sink) = collector();
        let inner_bus = bus.clone();
        bus.on("GROW", move |_| {
            let s = sink.clone();
            inner_bus.on("GROW", move |_| {
                s.lock().unwrap().push("late".into());
                Ok(())
            });
            Ok(())
        });

        assert_eq!(bus.emit("GROW", Value::Null), 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.listener_count("GROW"), 2);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.on("A", |_| Ok(()));
        bus.on("B", |_| Ok(()));
        bus.clear(Some("A"));
        assert_eq!(bus.listener_count("A"), 0);
        assert_eq!(bus.listener_count("B"), 1);
        bus.clear(None);
        assert_eq!(bus.emit("B", Value::Null), 0);
    }
}

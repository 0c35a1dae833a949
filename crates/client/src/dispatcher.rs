//! In-process publish/subscribe bus.
//!
//! Topics map to ordered handler lists; the wildcard topic receives every
//! emission wrapped in `{topic, data}`. Handlers are snapshotted and
//! invoked outside the registry lock, so they may subscribe or unsubscribe
//! reentrantly, and a panicking handler never suppresses the rest.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex},
};

use tracing::warn;

/// Topic that receives every emission as `{topic, data}`.
pub const WILDCARD: &str = "*";

/// Unsubscribe capability returned by [`EventDispatcher::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<String, Vec<(HandlerId, Handler)>>,
}

#[derive(Default)]
pub struct EventDispatcher {
    inner: Mutex<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Handlers run in registration order.
    pub fn on<F>(&self, topic: &str, handler: F) -> HandlerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let mut reg = self.inner.lock().unwrap();
        reg.next_id += 1;
        let id = HandlerId(reg.next_id);
        reg.topics
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether anything was removed.
    pub fn off(&self, topic: &str, id: HandlerId) -> bool {
        let mut reg = self.inner.lock().unwrap();
        let Some(handlers) = reg.topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Deliver `data` to every handler of `topic`, then to the wildcard
    /// handlers wrapped in `{topic, data}`.
    pub fn emit(&self, topic: &str, data: &serde_json::Value) {
        let (direct, wildcard) = {
            let reg = self.inner.lock().unwrap();
            let direct = reg.topics.get(topic).cloned().unwrap_or_default();
            let wildcard = if topic == WILDCARD {
                Vec::new()
            } else {
                reg.topics.get(WILDCARD).cloned().unwrap_or_default()
            };
            (direct, wildcard)
        };

        for (id, handler) in &direct {
            invoke(topic, *id, handler, data);
        }
        if !wildcard.is_empty() {
            let envelope = serde_json::json!({ "topic": topic, "data": data });
            for (id, handler) in &wildcard {
                invoke(topic, *id, handler, &envelope);
            }
        }
    }
}

fn invoke(topic: &str, id: HandlerId, handler: &Handler, data: &serde_json::Value) {
    if catch_unwind(AssertUnwindSafe(|| (**handler)(data))).is_err() {
        warn!(topic, handler = id.0, "event handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&serde_json::Value) + Send + Sync>)
    {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let log2 = Arc::clone(&log);
        let make = move |tag: &str| {
            let log = Arc::clone(&log2);
            let tag = tag.to_string();
            Box::new(move |_: &serde_json::Value| {
                log.lock().unwrap().push(tag.clone());
            }) as Box<dyn Fn(&serde_json::Value) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventDispatcher::new();
        let (log, make) = recorder();
        bus.on("tick", make("first"));
        bus.on("tick", make("second"));
        bus.emit("tick", &serde_json::json!(1));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn wildcard_receives_topic_and_data_envelope() {
        let bus = EventDispatcher::new();
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        bus.on(WILDCARD, move |v| {
            sink.lock().unwrap().push(v.clone());
        });
        bus.emit("chat.message", &serde_json::json!({ "text": "hi" }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["topic"], "chat.message");
        assert_eq!(seen[0]["data"]["text"], "hi");
    }

    #[test]
    fn off_stops_delivery() {
        let bus = EventDispatcher::new();
        let (log, make) = recorder();
        let id = bus.on("tick", make("gone"));
        bus.on("tick", make("kept"));
        assert!(bus.off("tick", id));
        assert!(!bus.off("tick", id));
        bus.emit("tick", &serde_json::json!(null));
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[test]
    fn panicking_handler_does_not_suppress_the_rest() {
        let bus = EventDispatcher::new();
        let (log, make) = recorder();
        bus.on("tick", |_: &serde_json::Value| panic!("boom"));
        bus.on("tick", make("survivor"));
        let wild = Arc::clone(&log);
        bus.on(WILDCARD, move |_| {
            wild.lock().unwrap().push("wildcard".into());
        });
        bus.emit("tick", &serde_json::json!(null));
        assert_eq!(*log.lock().unwrap(), vec!["survivor", "wildcard"]);
    }
}

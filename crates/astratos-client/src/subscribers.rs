//! Topic-to-callback registry used to fan incoming envelopes out.
//!
//! Each topic maps to an ordered list of registrations. Dispatch copies
//! the list under the lock and calls out with the lock released, so a
//! callback may subscribe or unsubscribe (itself included) without
//! disturbing the dispatch in progress. An entry deactivated mid-dispatch
//! is skipped for the rest of that dispatch.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use astratos_types::SubscriptionId;
use serde_json::Value;
use tracing::error;

/// A subscriber callback. Invoked with the envelope payload.
pub type Callback = dyn Fn(&Value) + Send + Sync;

struct Entry {
    active: AtomicBool,
    callback: Box<Callback>,
}

type Topics = BTreeMap<String, Vec<(SubscriptionId, Arc<Entry>)>>;

/// Ordered per-topic callback lists.
#[derive(Default)]
pub struct SubscriberRegistry {
    topics: Mutex<Topics>,
}

impl core::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let topics = self.lock();
        let mut map = f.debug_map();
        for (topic, entries) in topics.iter() {
            map.entry(topic, &entries.len());
        }
        map.finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Topics> {
        // Callbacks never run while this is held.
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` on `topic`, after any existing registrations.
    pub fn subscribe<F>(self: &Arc<Self>, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let entry = Arc::new(Entry {
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });
        self.lock()
            .entry(topic.to_owned())
            .or_default()
            .push((id, Arc::clone(&entry)));

        Subscription {
            id,
            topic: topic.to_owned(),
            entry,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.lock();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Number of live registrations on `topic`.
    pub fn count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    /// Invoke every callback on `topic` with `payload`, in registration
    /// order. Returns how many callbacks ran to completion.
    ///
    /// A panicking callback is logged and its siblings still run.
    pub fn dispatch(&self, topic: &str, payload: &Value) -> usize {
        let snapshot: Vec<(SubscriptionId, Arc<Entry>)> = match self.lock().get(topic) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut completed: usize = 0;
        for (id, entry) in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(payload))) {
                Ok(()) => completed = completed.saturating_add(1),
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_owned());
                    error!(topic, subscription_id = %id, reason = %reason, "subscriber callback panicked");
                }
            }
        }
        completed
    }
}

/// Handle to one registration. Dropping it does not unsubscribe.
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    entry: Arc<Entry>,
    registry: Weak<SubscriberRegistry>,
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// This registration's identifier.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The topic this registration listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the registration is still live.
    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
    }

    /// Remove exactly this registration. Idempotent, and safe to call from
    /// inside any callback, including this one.
    pub fn unsubscribe(&self) {
        if !self.entry.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(&Value) + Send + Sync + 'static {
        let log = Arc::clone(log);
        let tag = tag.to_owned();
        move |payload| log.lock().unwrap().push(format!("{tag}:{payload}"))
    }

    #[test]
    fn dispatch_runs_in_registration_order() {
        let registry = Arc::new(SubscriberRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = registry.subscribe("T", recorder(&log, "a"));
        let _b = registry.subscribe("T", recorder(&log, "b"));
        let _other = registry.subscribe("U", recorder(&log, "u"));

        assert_eq!(registry.dispatch("T", &json!(1)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn unknown_topic_dispatches_nothing() {
        let registry = Arc::new(SubscriberRegistry::new());
        assert_eq!(registry.dispatch("NOPE", &json!({})), 0);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_registration() {
        let registry = Arc::new(SubscriberRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.subscribe("T", recorder(&log, "a"));
        let _b = registry.subscribe("T", recorder(&log, "b"));
        let _c = registry.subscribe("T", recorder(&log, "a"));

        a.unsubscribe();
        assert!(!a.is_active());
        assert_eq!(registry.count("T"), 2);

        a.unsubscribe();
        assert_eq!(registry.count("T"), 2);

        registry.dispatch("T", &json!("x"));
        assert_eq!(*log.lock().unwrap(), vec![r#"b:"x""#, r#"a:"x""#]);
    }

    #[test]
    fn last_unsubscribe_drops_the_topic() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sub = registry.subscribe("T", |_| {});
        sub.unsubscribe();
        assert_eq!(registry.count("T"), 0);
        assert!(registry.lock().is_empty());
    }

    #[test]
    fn panicking_callback_does_not_stop_siblings() {
        let registry = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let _a = registry.subscribe("T", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let _boom = registry.subscribe("T", |_| panic!("subscriber exploded"));
        let h2 = Arc::clone(&hits);
        let _c = registry.subscribe("T", move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch("T", &json!(null)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Registry still usable afterwards.
        assert_eq!(registry.dispatch("T", &json!(null)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn self_unsubscribe_during_dispatch_is_safe() {
        let registry = Arc::new(SubscriberRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = Arc::clone(&slot);
        let log_in_cb = Arc::clone(&log);
        let once = registry.subscribe("T", move |payload| {
            log_in_cb.lock().unwrap().push(format!("once:{payload}"));
            if let Some(sub) = slot_in_cb.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(once);
        let _after = registry.subscribe("T", recorder(&log, "after"));

        registry.dispatch("T", &json!(1));
        registry.dispatch("T", &json!(2));

        assert_eq!(*log.lock().unwrap(), vec!["once:1", "after:1", "after:2"]);
        assert_eq!(registry.count("T"), 1);
    }

    #[test]
    fn sibling_unsubscribed_mid_dispatch_is_skipped() {
        let registry = Arc::new(SubscriberRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = Arc::clone(&victim_slot);
        let _killer = registry.subscribe("T", move |_| {
            if let Some(sub) = slot_in_cb.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        let victim = registry.subscribe("T", recorder(&log, "victim"));
        *victim_slot.lock().unwrap() = Some(victim);

        registry.dispatch("T", &json!(1));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn subscribing_during_dispatch_takes_effect_next_time() {
        let registry = Arc::new(SubscriberRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let added: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&registry);
        let log_in_cb = Arc::clone(&log);
        let added_in_cb = Arc::clone(&added);
        let _adder = registry.subscribe("T", move |_| {
            if let Some(registry) = weak.upgrade() {
                let sub = registry.subscribe("T", recorder(&log_in_cb, "late"));
                added_in_cb.lock().unwrap().push(sub);
            }
        });

        registry.dispatch("T", &json!(1));
        assert!(log.lock().unwrap().is_empty());

        registry.dispatch("T", &json!(2));
        assert_eq!(*log.lock().unwrap(), vec!["late:2"]);
    }
}

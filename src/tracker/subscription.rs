use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tracing::trace;

use super::entities::Activity;

type Handler = Arc<dyn Fn(&[Activity]) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

/// Set of change listeners. Handlers run synchronously, in subscription order, on whichever task
/// delivered the change.
#[derive(Default, Clone)]
pub struct Subscribers {
    registry: Arc<Mutex<Registry>>,
}

impl Subscribers {
    pub fn subscribe(&self, handler: impl Fn(&[Activity]) + Send + Sync + 'static) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, Arc::new(handler));
        trace!("Added subscriber {id}");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn notify(&self, activities: &[Activity]) {
        // Handlers may subscribe or unsubscribe themselves, so they are called outside the lock.
        let handlers = lock(&self.registry)
            .handlers
            .values()
            .cloned()
            .collect::<Vec<_>>();
        trace!("Notifying {} subscribers", handlers.len());
        for handler in handlers {
            handler(activities);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [Subscribers::subscribe]. Dropping it removes the handler; it only holds a
/// weak reference to the registry so it never keeps the data manager alive.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keeps the handler registered for as long as the data manager lives.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).handlers.remove(&self.id);
            trace!("Removed subscriber {}", self.id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::tracker::entities::Activity;

    use super::Subscribers;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let subscribers = Subscribers::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let subscription = subscribers.subscribe(move |activities| {
            counter.fetch_add(activities.len(), Ordering::SeqCst);
        });

        subscribers.notify(&[Activity::new("Work", None)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        assert!(subscribers.is_empty());

        subscribers.notify(&[Activity::new("Work", None)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_subscription_survives() {
        let subscribers = Subscribers::default();
        subscribers.subscribe(|_| {}).detach();
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let subscribers = Subscribers::default();
        let subscription = subscribers.subscribe(|_| {});
        drop(subscribers);
        subscription.unsubscribe();
    }
}

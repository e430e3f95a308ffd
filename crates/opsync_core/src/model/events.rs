//! Subscriber fan-out shared by models and stores.

use parking_lot::RwLock;
use std::sync::Arc;

/// A list of subscribers that events are fanned out to.
///
/// Handlers are invoked outside the internal lock, so a handler may
/// subscribe, unsubscribe or fire further events without deadlocking.
pub struct EventProducer<H: ?Sized> {
    subscribers: RwLock<Vec<Arc<H>>>,
}

impl<H: ?Sized> EventProducer<H> {
    /// Creates a producer with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Adds a subscriber.
    pub fn subscribe(&self, handler: Arc<H>) {
        self.subscribers.write().push(handler);
    }

    /// Removes a subscriber previously added with the same `Arc`.
    pub fn unsubscribe(&self, handler: &Arc<H>) {
        let target = Arc::as_ptr(handler).cast::<()>();
        self.subscribers
            .write()
            .retain(|h| Arc::as_ptr(h).cast::<()>() != target);
    }

    /// Calls `f` for every current subscriber, in subscription order.
    pub fn fire(&self, f: impl Fn(&H)) {
        let snapshot = self.subscribers.read().clone();
        for handler in &snapshot {
            f(handler);
        }
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns true if anyone is subscribed.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.read().is_empty()
    }
}

impl<H: ?Sized> Default for EventProducer<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fire_reaches_all_subscribers() {
        let producer: EventProducer<dyn Counter> = EventProducer::new();
        let a = Arc::new(Hits(AtomicUsize::new(0)));
        let b = Arc::new(Hits(AtomicUsize::new(0)));
        producer.subscribe(a.clone());
        producer.subscribe(b.clone());

        producer.fire(|h| h.hit());

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
        assert_eq!(producer.subscriber_count(), 2);
    }

    #[test]
    fn unsubscribe_by_identity() {
        let producer: EventProducer<dyn Counter> = EventProducer::new();
        let a: Arc<dyn Counter> = Arc::new(Hits(AtomicUsize::new(0)));
        producer.subscribe(Arc::clone(&a));
        producer.unsubscribe(&a);

        assert!(!producer.has_subscribers());
    }
}

//! Listener registration for change notifications.
//!
//! Every notification edge in an operation graph is an explicit listener
//! registered on an [`Event`]. Registration returns a [`Subscription`]
//! handle; dropping or cancelling the handle removes the edge.
//!
//! Delivery is synchronous and re-entrant: a listener may mutate sources,
//! subscribe or unsubscribe while an emission is in progress. Emission works
//! from a snapshot of the listener list and skips listeners removed since the
//! snapshot was taken.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use ripple_core::Result;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for change notifications.
pub type Listener<E> = Rc<dyn Fn(&E) -> Result<()>>;

/// Manages the listeners registered on one event.
pub struct SubscriptionManager<E> {
    /// Active listeners in subscription order
    subscriptions: Vec<(SubscriptionId, Listener<E>)>,
    /// Next subscription ID to assign
    next_id: SubscriptionId,
}

impl<E> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SubscriptionManager<E> {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers a listener and returns its ID.
    pub fn subscribe(&mut self, listener: Listener<E>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.push((id, listener));
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|(sid, _)| *sid != id);
        self.subscriptions.len() != before
    }

    /// Returns true if the ID is still registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|(sid, _)| *sid == id)
    }

    /// Returns a snapshot of the registered listeners.
    pub fn snapshot(&self) -> Vec<(SubscriptionId, Listener<E>)> {
        self.subscriptions.clone()
    }

    /// Returns the number of active subscriptions.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if there are no subscriptions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Clears all subscriptions.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

/// A notification channel that listeners can subscribe to.
pub struct Event<E: 'static> {
    manager: Rc<RefCell<SubscriptionManager<E>>>,
}

impl<E: 'static> Default for Event<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> fmt::Debug for Event<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: 'static> Event<E> {
    /// Creates an event with no listeners.
    pub fn new() -> Self {
        Self {
            manager: Rc::new(RefCell::new(SubscriptionManager::new())),
        }
    }

    /// Subscribes a listener.
    ///
    /// The listener stays registered until the returned handle is cancelled
    /// or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) -> Result<()> + 'static,
    {
        let id = self.manager.borrow_mut().subscribe(Rc::new(listener));
        let manager: Weak<RefCell<SubscriptionManager<E>>> = Rc::downgrade(&self.manager);
        Subscription {
            id,
            cancel: Some(Box::new(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.borrow_mut().unsubscribe(id);
                }
            })),
        }
    }

    /// Delivers `event` to every listener in subscription order.
    ///
    /// A failing listener does not stop delivery: every listener in the
    /// snapshot runs, and the first error is returned once all have run.
    pub fn emit(&self, event: &E) -> Result<()> {
        let snapshot = self.manager.borrow().snapshot();
        let mut first_error = None;
        for (id, listener) in snapshot {
            if !self.manager.borrow().contains(id) {
                continue;
            }
            if let Err(err) = listener(event) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.manager.borrow().len()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.manager.borrow_mut().clear();
    }
}

/// Handle to a registered listener.
///
/// Cancelling is idempotent; dropping the handle cancels it.
pub struct Subscription {
    /// Unique identifier within the owning event
    id: SubscriptionId,
    /// Removes the listener from its event, taken on first cancel
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Returns the subscription ID.
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns whether this subscription is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Removes the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use core::cell::Cell;
    use ripple_core::Error;

    #[test]
    fn test_subscription_manager_subscribe() {
        let mut manager: SubscriptionManager<i32> = SubscriptionManager::new();

        let id1 = manager.subscribe(Rc::new(|_| Ok(())));
        let id2 = manager.subscribe(Rc::new(|_| Ok(())));

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
        assert!(manager.contains(id1));
    }

    #[test]
    fn test_subscription_manager_unsubscribe() {
        let mut manager: SubscriptionManager<i32> = SubscriptionManager::new();

        let id = manager.subscribe(Rc::new(|_| Ok(())));
        assert!(manager.unsubscribe(id));
        assert!(manager.is_empty());
        assert!(!manager.unsubscribe(id)); // Already removed
    }

    #[test]
    fn test_event_emit_in_subscription_order() {
        let event: Event<i32> = Event::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = log.clone();
        let _s1 = event.subscribe(move |v| {
            l1.borrow_mut().push((1, *v));
            Ok(())
        });
        let l2 = log.clone();
        let _s2 = event.subscribe(move |v| {
            l2.borrow_mut().push((2, *v));
            Ok(())
        });

        event.emit(&7).unwrap();
        assert_eq!(*log.borrow(), vec![(1, 7), (2, 7)]);
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let event: Event<i32> = Event::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let sub = event.subscribe(move |_| {
            c.set(c.get() + 1);
            Ok(())
        });
        assert_eq!(event.listener_count(), 1);

        drop(sub);
        assert_eq!(event.listener_count(), 0);

        event.emit(&1).unwrap();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let event: Event<i32> = Event::new();
        let mut sub = event.subscribe(|_| Ok(()));
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outlives_event() {
        let event: Event<i32> = Event::new();
        let mut sub = event.subscribe(|_| Ok(()));
        drop(event);
        sub.unsubscribe();
    }

    #[test]
    fn test_emit_reaches_listeners_after_an_error() {
        let event: Event<i32> = Event::new();
        let reached = Rc::new(Cell::new(false));

        let _s1 = event.subscribe(|_| Err(Error::evaluation("boom")));
        let _s2 = event.subscribe(|_| Err(Error::evaluation("second")));
        let r = reached.clone();
        let _s3 = event.subscribe(move |_| {
            r.set(true);
            Ok(())
        });

        // The first error wins
        assert_eq!(event.emit(&1), Err(Error::evaluation("boom")));
        assert!(reached.get());
    }

    #[test]
    fn test_listener_removed_during_emit_is_skipped() {
        let event: Event<i32> = Event::new();
        let second_calls = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let v = victim.clone();
        let _s1 = event.subscribe(move |_| {
            if let Some(mut sub) = v.borrow_mut().take() {
                sub.unsubscribe();
            }
            Ok(())
        });
        let c = second_calls.clone();
        *victim.borrow_mut() = Some(event.subscribe(move |_| {
            c.set(c.get() + 1);
            Ok(())
        }));

        event.emit(&1).unwrap();
        assert_eq!(second_calls.get(), 0);
    }

    #[test]
    fn test_reentrant_subscribe_during_emit() {
        let event: Rc<Event<i32>> = Rc::new(Event::new());
        let held: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let e = Rc::downgrade(&event);
        let h = held.clone();
        let _s = event.subscribe(move |_| {
            if let Some(e) = e.upgrade() {
                h.borrow_mut().push(e.subscribe(|_| Ok(())));
            }
            Ok(())
        });

        event.emit(&1).unwrap();
        assert_eq!(event.listener_count(), 2);
    }
}

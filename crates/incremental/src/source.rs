//! Source links and the pass-through source operation.
//!
//! A `SourceLink` is the single upstream edge of a node: it owns the
//! subscription to the upstream's collection changes for as long as the node
//! is attached. `SourceOperation` is the simplest node built on it and
//! republishes every upstream notification unchanged.

use crate::operation::{Attach, Operation};
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use ripple_core::{Error, Result, Value};
use ripple_reactive::{
    CollectionChange, Event, Observable, ObservableSequence, Subscription, ValueChange,
};
use tracing::debug;

struct AttachedSource {
    source: Rc<dyn ObservableSequence>,
    // Held for its Drop: removes the listener from the upstream
    _subscription: Subscription,
}

/// The upstream edge of a node.
pub struct SourceLink {
    operation: &'static str,
    attached: RefCell<Option<AttachedSource>>,
}

impl SourceLink {
    /// Creates a detached link for the named operation.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            attached: RefCell::new(None),
        }
    }

    /// Subscribes `on_change` to `source`'s collection changes.
    pub fn attach<F>(&self, source: Rc<dyn ObservableSequence>, on_change: F) -> Result<()>
    where
        F: Fn(&CollectionChange) -> Result<()> + 'static,
    {
        if self.attached.borrow().is_some() {
            return Err(Error::already_attached(self.operation));
        }
        let subscription = source.collection_changed().subscribe(on_change);
        debug!(operation = self.operation, items = source.len(), "attached to source");
        *self.attached.borrow_mut() = Some(AttachedSource {
            source,
            _subscription: subscription,
        });
        Ok(())
    }

    /// Drops the subscription. Returns false if the link was not attached.
    pub fn detach(&self) -> bool {
        let attached = self.attached.borrow_mut().take();
        match attached {
            Some(attached) => {
                drop(attached);
                debug!(operation = self.operation, "detached from source");
                true
            }
            None => false,
        }
    }

    /// Returns true while attached.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.borrow().is_some()
    }

    /// Returns the attached upstream.
    pub fn source(&self) -> Option<Rc<dyn ObservableSequence>> {
        self.attached.borrow().as_ref().map(|a| a.source.clone())
    }

    /// Returns the upstream's current items, or nothing when detached.
    pub fn items(&self) -> Vec<Value> {
        self.source().map(|s| s.items()).unwrap_or_default()
    }

    /// Returns the name of the owning operation.
    #[inline]
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// A sequence operation that mirrors its upstream.
///
/// Attaching raises a reset so listeners that subscribed before the upstream
/// was known rebuild from the now-available items.
pub struct SourceOperation {
    this: Weak<Self>,
    link: SourceLink,
    collection_changed: Event<CollectionChange>,
    value_changed: Event<ValueChange>,
}

impl SourceOperation {
    /// Creates a detached pass-through operation.
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            link: SourceLink::new("source"),
            collection_changed: Event::new(),
            value_changed: Event::new(),
        })
    }

    /// Creates a pass-through operation attached to `source`.
    pub fn over(source: Rc<dyn ObservableSequence>) -> Result<Rc<Self>> {
        let op = Self::new();
        op.attach(source)?;
        Ok(op)
    }

    fn on_source_changed(&self, change: &CollectionChange) -> Result<()> {
        if !self.link.is_attached() {
            return Ok(());
        }
        self.collection_changed.emit(change)
    }
}

impl Attach for SourceOperation {
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()> {
        let this = self.this.clone();
        self.link.attach(source, move |change| match this.upgrade() {
            Some(op) => op.on_source_changed(change),
            None => Ok(()),
        })?;
        self.collection_changed.emit(&CollectionChange::reset())
    }

    fn detach(&self) {
        self.link.detach();
    }

    fn is_attached(&self) -> bool {
        self.link.is_attached()
    }
}

impl Observable for SourceOperation {
    fn value(&self) -> Value {
        Value::List(self.items())
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl ObservableSequence for SourceOperation {
    fn items(&self) -> Vec<Value> {
        self.link.items()
    }

    fn collection_changed(&self) -> &Event<CollectionChange> {
        &self.collection_changed
    }
}

impl Operation for SourceOperation {
    fn dispose(&self) {
        self.detach();
    }
}

//! Per-item projection operator.

use crate::context::EvalContext;
use crate::lambda::{LambdaChange, LambdaContainer, LambdaValueChanged};
use crate::operation::{Attach, Lambda, Operation};
use alloc::rc::{Rc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;
use ripple_core::{Error, Result, Value};
use ripple_reactive::{
    CollectionChange, Event, Observable, ObservableSequence, Subscription, ValueChange,
};
use tracing::trace;

/// The sequence of per-item lambda results, in source order.
///
/// A projection whose value changes while its item stays put is republished
/// as a removal followed by an insertion at the same index.
pub struct SelectOperation {
    selector: Rc<LambdaContainer>,
    /// Position hidden from `items()` while a replaced projection's removal is delivered
    replacing: Cell<Option<usize>>,
    _subscriptions: Vec<Subscription>,
    collection_changed: Event<CollectionChange>,
    value_changed: Event<ValueChange>,
}

impl SelectOperation {
    /// Creates a detached projection.
    pub fn new(context: Rc<EvalContext>, selector: Lambda) -> Rc<Self> {
        let container = LambdaContainer::new(context, selector);
        Rc::new_cyclic(|this: &Weak<Self>| {
            let w = this.clone();
            let structural = container.changed().subscribe(move |change| match w.upgrade() {
                Some(op) => op.on_selector_changed(change),
                None => Ok(()),
            });
            let w = this.clone();
            let values = container
                .value_changed()
                .subscribe(move |change| match w.upgrade() {
                    Some(op) => op.on_projection_changed(change),
                    None => Ok(()),
                });

            Self {
                selector: container,
                replacing: Cell::new(None),
                _subscriptions: vec![structural, values],
                collection_changed: Event::new(),
                value_changed: Event::new(),
            }
        })
    }

    /// Returns the selector container.
    #[inline]
    pub fn selector(&self) -> &Rc<LambdaContainer> {
        &self.selector
    }

    fn on_selector_changed(&self, change: &LambdaChange) -> Result<()> {
        if !self.selector.is_attached() {
            return Ok(());
        }
        let change = match change {
            LambdaChange::Added { start, lambdas } => CollectionChange::added(
                *start,
                lambdas.iter().map(|l| l.value.clone()).collect(),
            ),
            LambdaChange::Removed { start, lambdas } => CollectionChange::removed(
                *start,
                lambdas.iter().map(|l| l.value.clone()).collect(),
            ),
            LambdaChange::Reset => CollectionChange::reset(),
        };
        self.collection_changed.emit(&change)
    }

    fn on_projection_changed(&self, change: &LambdaValueChanged) -> Result<()> {
        if !self.selector.is_attached() {
            return Ok(());
        }
        let Some(position) = self.selector.position(change.id) else {
            return Ok(());
        };
        trace!(position, "projection replaced");
        self.replacing.set(Some(position));
        let removed = self
            .collection_changed
            .emit(&CollectionChange::removed(position, vec![change.old.clone()]));
        self.replacing.set(None);
        let added = self
            .collection_changed
            .emit(&CollectionChange::added(position, vec![change.new.clone()]));
        removed.and(added)
    }
}

impl Attach for SelectOperation {
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()> {
        if self.selector.is_attached() {
            return Err(Error::already_attached("select"));
        }
        self.selector.attach(source)
    }

    fn detach(&self) {
        self.selector.detach();
    }

    fn is_attached(&self) -> bool {
        self.selector.is_attached()
    }
}

impl Observable for SelectOperation {
    fn value(&self) -> Value {
        Value::List(self.items())
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl ObservableSequence for SelectOperation {
    fn items(&self) -> Vec<Value> {
        let mut values = self.selector.values();
        if let Some(position) = self.replacing.get() {
            if position < values.len() {
                values.remove(position);
            }
        }
        values
    }

    fn len(&self) -> usize {
        let len = self.selector.len();
        match self.replacing.get() {
            Some(position) if position < len => len - 1,
            _ => len,
        }
    }

    fn collection_changed(&self) -> &Event<CollectionChange> {
        &self.collection_changed
    }
}

impl Operation for SelectOperation {
    fn dispose(&self) {
        self.detach();
    }
}

impl fmt::Debug for SelectOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOperation")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

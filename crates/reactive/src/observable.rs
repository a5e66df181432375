//! Observable values and sequences.
//!
//! `Observable` is anything with a current value and a value-changed event.
//! `ObservableSequence` additionally publishes structural changes over an
//! ordered list of items. `ObservableVec` is the mutable raw sequence that
//! sits at the leaves of an operation graph.

use crate::change_set::{CollectionChange, ValueChange};
use crate::subscription::Event;
use alloc::vec::Vec;
use core::cell::RefCell;
use ripple_core::{Error, Result, Value};
use tracing::trace;

/// A node with a current value that notifies when that value changes.
pub trait Observable {
    /// Returns a snapshot of the current value.
    fn value(&self) -> Value;

    /// Returns the value-changed event.
    fn value_changed(&self) -> &Event<ValueChange>;
}

/// A node producing an ordered sequence of items.
///
/// Sequence nodes report every structural mutation through
/// `collection_changed`. They do not raise `value_changed` for their own
/// contents; `value()` returns a `Value::List` snapshot of `items()`.
///
/// While a notification is delivered, `items()` reflects the sequence with
/// exactly that notification applied.
pub trait ObservableSequence: Observable {
    /// Returns a snapshot of the current items in order.
    fn items(&self) -> Vec<Value>;

    /// Returns the number of items.
    fn len(&self) -> usize {
        self.items().len()
    }

    /// Returns true if there are no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the structural change event.
    fn collection_changed(&self) -> &Event<CollectionChange>;
}

/// A mutable sequence that publishes its mutations.
///
/// Every mutation is committed before listeners run. A listener error is
/// returned to the caller but does not roll the mutation back.
///
/// # Example
///
/// ```ignore
/// use ripple_reactive::{ObservableSequence, ObservableVec};
///
/// let source = ObservableVec::from_values([3i64, 1, 2]);
/// let _sub = source.collection_changed().subscribe(|change| {
///     println!("changed: {:?}", change);
///     Ok(())
/// });
/// source.insert(0, 0i64.into())?;
/// ```
#[derive(Debug, Default)]
pub struct ObservableVec {
    items: RefCell<Vec<Value>>,
    collection_changed: Event<CollectionChange>,
    value_changed: Event<ValueChange>,
}

impl ObservableVec {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence holding `items`.
    pub fn with_items(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
            ..Self::default()
        }
    }

    /// Creates a sequence from anything convertible into values.
    pub fn from_values<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::with_items(values.into_iter().map(Into::into).collect())
    }

    /// Returns the item at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Appends an item.
    pub fn push(&self, item: Value) -> Result<()> {
        let index = self.items.borrow().len();
        self.insert_range(index, alloc::vec![item])
    }

    /// Inserts an item at `index`.
    pub fn insert(&self, index: usize, item: Value) -> Result<()> {
        self.insert_range(index, alloc::vec![item])
    }

    /// Inserts a contiguous run of items at `index`.
    pub fn insert_range(&self, index: usize, items: Vec<Value>) -> Result<()> {
        {
            let mut current = self.items.borrow_mut();
            if index > current.len() {
                return Err(Error::index_out_of_bounds(index, current.len()));
            }
            if items.is_empty() {
                return Ok(());
            }
            current.splice(index..index, items.iter().cloned());
        }
        trace!(start = index, count = items.len(), "source items added");
        self.collection_changed
            .emit(&CollectionChange::added(index, items))
    }

    /// Removes and returns the item at `index`.
    pub fn remove_at(&self, index: usize) -> Result<Value> {
        let mut removed = self.remove_range(index, 1)?;
        Ok(removed.pop().unwrap_or_default())
    }

    /// Removes `count` items starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<Value>> {
        let removed: Vec<Value> = {
            let mut current = self.items.borrow_mut();
            let end = index.saturating_add(count);
            if end > current.len() {
                return Err(Error::index_out_of_bounds(end, current.len()));
            }
            current.drain(index..end).collect()
        };
        if removed.is_empty() {
            return Ok(removed);
        }
        trace!(start = index, count = removed.len(), "source items removed");
        self.collection_changed
            .emit(&CollectionChange::removed(index, removed.clone()))?;
        Ok(removed)
    }

    /// Removes the first item equal to `item`.
    ///
    /// Returns false if no such item exists.
    pub fn remove_item(&self, item: &Value) -> Result<bool> {
        let position = self.items.borrow().iter().position(|v| v == item);
        match position {
            Some(index) => self.remove_range(index, 1).map(|_| true),
            None => Ok(false),
        }
    }

    /// Replaces the whole sequence and raises a reset.
    pub fn replace_all(&self, items: Vec<Value>) -> Result<()> {
        *self.items.borrow_mut() = items;
        trace!(count = self.items.borrow().len(), "source reset");
        self.collection_changed.emit(&CollectionChange::reset())
    }

    /// Removes every item and raises a reset.
    pub fn clear(&self) -> Result<()> {
        self.replace_all(Vec::new())
    }
}

impl Observable for ObservableVec {
    fn value(&self) -> Value {
        Value::List(self.items())
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl ObservableSequence for ObservableVec {
    fn items(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    fn len(&self) -> usize {
        self.items.borrow().len()
    }

    fn collection_changed(&self) -> &Event<CollectionChange> {
        &self.collection_changed
    }
}

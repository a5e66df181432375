//! Order-maintaining operator.
//!
//! `OrderByOperation` presents its source sorted by a per-item key lambda.
//! Keys live in an ordered multiset: entries compare by key (in the view's
//! direction) and then by the key instance's id, so equal keys stay distinct.
//!
//! Structural changes are applied incrementally. When a key's own value
//! changes, its stored position is stale; the view then resynchronizes the
//! whole set against the container's live keys and raises a reset.

use crate::context::EvalContext;
use crate::lambda::{LambdaChange, LambdaContainer, LambdaId, LambdaRef, LambdaValueChanged};
use crate::operation::{Attach, Lambda, Operation};
use alloc::collections::BTreeSet;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Ordering;
use core::fmt;
use hashbrown::HashSet;
use ripple_core::{Error, Order, Result, Value};
use ripple_reactive::{
    CollectionChange, Event, Observable, ObservableSequence, Subscription, ValueChange,
};
use tracing::{debug, trace, warn};

/// One key instance in the ordered multiset.
#[derive(Clone, Debug)]
struct SortEntry {
    key: Value,
    id: LambdaId,
    item: Value,
    order: Order,
}

impl SortEntry {
    fn new(lambda: &LambdaRef, order: Order) -> Self {
        Self {
            key: lambda.value.clone(),
            id: lambda.id,
            item: lambda.item.clone(),
            order,
        }
    }
}

impl PartialEq for SortEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.key == other.key
    }
}

impl Eq for SortEntry {}

impl PartialOrd for SortEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortEntry {
    // Ties on key fall back to id ascending in both directions
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .apply(self.key.cmp(&other.key))
            .then(self.id.cmp(&other.id))
    }
}

/// Splits sorted positions into contiguous runs of `(start, items)`.
fn contiguous_runs<T>(mut positioned: Vec<(usize, T)>) -> Vec<(usize, Vec<T>)> {
    positioned.sort_by_key(|(position, _)| *position);
    let mut runs: Vec<(usize, Vec<T>)> = Vec::new();
    for (position, item) in positioned {
        match runs.last_mut() {
            Some((start, items)) if *start + items.len() == position => items.push(item),
            _ => runs.push((position, alloc::vec![item])),
        }
    }
    runs
}

/// A sequence view sorted by a per-item key.
pub struct OrderByOperation {
    order: Order,
    keys: Rc<LambdaContainer>,
    sorted: RefCell<BTreeSet<SortEntry>>,
    _subscriptions: Vec<Subscription>,
    collection_changed: Event<CollectionChange>,
    value_changed: Event<ValueChange>,
}

impl OrderByOperation {
    /// Creates a detached view ordered by `key` in `order`.
    pub fn new(context: Rc<EvalContext>, key: Lambda, order: Order) -> Rc<Self> {
        let keys = LambdaContainer::new(context, key);
        Rc::new_cyclic(|this: &Weak<Self>| {
            let w = this.clone();
            let structural = keys.changed().subscribe(move |change| match w.upgrade() {
                Some(op) => op.on_keys_changed(change),
                None => Ok(()),
            });
            let w = this.clone();
            let values = keys.value_changed().subscribe(move |change| match w.upgrade() {
                Some(op) => op.on_key_value_changed(change),
                None => Ok(()),
            });

            Self {
                order,
                keys,
                sorted: RefCell::new(BTreeSet::new()),
                _subscriptions: alloc::vec![structural, values],
                collection_changed: Event::new(),
                value_changed: Event::new(),
            }
        })
    }

    /// Creates an ascending view.
    pub fn order_by(context: Rc<EvalContext>, key: Lambda) -> Rc<Self> {
        Self::new(context, key, Order::Asc)
    }

    /// Creates a descending view.
    pub fn order_by_descending(context: Rc<EvalContext>, key: Lambda) -> Rc<Self> {
        Self::new(context, key, Order::Desc)
    }

    /// Secondary ordering is not implemented.
    pub fn then_by(&self, _key: Lambda) -> Result<Rc<OrderByOperation>> {
        Err(Error::not_supported("then_by"))
    }

    /// Secondary ordering is not implemented.
    pub fn then_by_descending(&self, _key: Lambda) -> Result<Rc<OrderByOperation>> {
        Err(Error::not_supported("then_by_descending"))
    }

    /// Returns the sort direction.
    #[inline]
    pub fn order(&self) -> Order {
        self.order
    }

    /// Returns the key container.
    #[inline]
    pub fn keys(&self) -> &Rc<LambdaContainer> {
        &self.keys
    }

    /// Returns the keys in view order.
    pub fn sorted_keys(&self) -> Vec<Value> {
        self.sorted.borrow().iter().map(|e| e.key.clone()).collect()
    }

    fn on_keys_changed(&self, change: &LambdaChange) -> Result<()> {
        if !self.keys.is_attached() {
            return Ok(());
        }
        match change {
            LambdaChange::Added { lambdas, .. } => self.on_added(lambdas),
            LambdaChange::Removed { lambdas, .. } => self.on_removed(lambdas),
            LambdaChange::Reset => self.resync(),
        }
    }

    fn on_key_value_changed(&self, change: &LambdaValueChanged) -> Result<()> {
        if !self.keys.is_attached() {
            return Ok(());
        }
        trace!(id = change.id, "sort key changed");
        self.resync()
    }

    fn on_added(&self, lambdas: &[LambdaRef]) -> Result<()> {
        let ids: HashSet<LambdaId> = lambdas.iter().map(|l| l.id).collect();
        let positioned: Vec<(usize, SortEntry)> = {
            let mut sorted = self.sorted.borrow_mut();
            let entries: Vec<SortEntry> = lambdas
                .iter()
                .map(|l| SortEntry::new(l, self.order))
                .collect();
            sorted.extend(entries.iter().cloned());
            let positioned = sorted
                .iter()
                .enumerate()
                .filter(|(_, e)| ids.contains(&e.id))
                .map(|(position, e)| (position, e.clone()))
                .collect();
            for entry in &entries {
                sorted.remove(entry);
            }
            positioned
        };

        // Ascending runs: a run lands at its final positions once the earlier runs are in
        let mut outcome = Ok(());
        for (start, run) in contiguous_runs(positioned) {
            let items: Vec<Value> = run.iter().map(|e| e.item.clone()).collect();
            self.sorted.borrow_mut().extend(run);
            trace!(start, count = items.len(), "ordered items added");
            let emitted = self
                .collection_changed
                .emit(&CollectionChange::added(start, items));
            if outcome.is_ok() {
                outcome = emitted;
            }
        }
        outcome
    }

    fn on_removed(&self, lambdas: &[LambdaRef]) -> Result<()> {
        let ids: HashSet<LambdaId> = lambdas.iter().map(|l| l.id).collect();
        let found: Vec<(usize, SortEntry)> = self
            .sorted
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, e)| ids.contains(&e.id))
            .map(|(position, e)| (position, e.clone()))
            .collect();
        if found.len() != ids.len() {
            let message = format!(
                "{} of {} removed keys are not held",
                ids.len() - found.len(),
                ids.len()
            );
            warn!(operation = "order_by", %message, "inconsistent key removal");
            return Err(Error::inconsistent("order_by", message));
        }

        // Descending runs: later removals never shift earlier positions
        let mut outcome = Ok(());
        for (start, run) in contiguous_runs(found).into_iter().rev() {
            {
                let mut sorted = self.sorted.borrow_mut();
                for entry in &run {
                    sorted.remove(entry);
                }
            }
            let items: Vec<Value> = run.into_iter().map(|e| e.item).collect();
            trace!(start, count = items.len(), "ordered items removed");
            let emitted = self
                .collection_changed
                .emit(&CollectionChange::removed(start, items));
            if outcome.is_ok() {
                outcome = emitted;
            }
        }
        outcome
    }

    /// Brings the held set in line with the container's live keys and
    /// raises a reset.
    fn resync(&self) -> Result<()> {
        let live: BTreeSet<SortEntry> = self
            .keys
            .lambdas()
            .iter()
            .map(|l| SortEntry::new(l, self.order))
            .collect();
        let (removed, inserted) = {
            let mut held = self.sorted.borrow_mut();
            let stale: Vec<SortEntry> = held.difference(&live).cloned().collect();
            let fresh: Vec<SortEntry> = live.difference(&held).cloned().collect();
            for entry in &stale {
                held.remove(entry);
            }
            let counts = (stale.len(), fresh.len());
            held.extend(fresh);
            counts
        };
        debug!(removed, inserted, "order view resynchronized");
        self.collection_changed.emit(&CollectionChange::reset())
    }
}

impl Attach for OrderByOperation {
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()> {
        if self.keys.is_attached() {
            return Err(Error::already_attached("order_by"));
        }
        // The container's reset fills the view
        self.keys.attach(source)
    }

    fn detach(&self) {
        if !self.keys.is_attached() {
            return;
        }
        self.keys.detach();
        self.sorted.borrow_mut().clear();
        debug!(operation = "order_by", "order view detached");
    }

    fn is_attached(&self) -> bool {
        self.keys.is_attached()
    }
}

impl Observable for OrderByOperation {
    fn value(&self) -> Value {
        Value::List(self.items())
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl ObservableSequence for OrderByOperation {
    fn items(&self) -> Vec<Value> {
        self.sorted.borrow().iter().map(|e| e.item.clone()).collect()
    }

    fn len(&self) -> usize {
        self.sorted.borrow().len()
    }

    fn collection_changed(&self) -> &Event<CollectionChange> {
        &self.collection_changed
    }
}

impl Operation for OrderByOperation {
    fn dispose(&self) {
        self.detach();
    }
}

impl fmt::Debug for OrderByOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderByOperation")
            .field("order", &self.order)
            .field("len", &self.sorted.borrow().len())
            .field("attached", &self.keys.is_attached())
            .finish_non_exhaustive()
    }
}

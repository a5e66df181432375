//! Per-item lambda container.
//!
//! A `LambdaContainer` keeps one live lambda instance per item of its source
//! sequence. Each instance is evaluated in its own derived context, so two
//! equal items still get independent instances. The container re-exposes two
//! kinds of events to its owner:
//!
//! - `changed`: instances were added, removed or rebuilt, mirroring the source
//! - `value_changed`: one instance's value changed while the source did not

use crate::context::EvalContext;
use crate::operation::{Attach, Lambda, Operation};
use crate::source::SourceLink;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use ripple_core::{Error, Result, Value};
use ripple_reactive::{
    CollectionChange, Event, Observable, ObservableSequence, Subscription, ValueChange,
};
use tracing::{debug, trace, warn};

/// Identity of one lambda instance, unique within its container.
///
/// Ids are handed out in creation order and never reused.
pub type LambdaId = u64;

/// A snapshot of one lambda instance.
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaRef {
    pub id: LambdaId,
    /// The source item the instance is bound to
    pub item: Value,
    /// The instance's value when the snapshot was taken
    pub value: Value,
}

/// A structural change to a container's instances.
#[derive(Clone, Debug, PartialEq)]
pub enum LambdaChange {
    /// Instances created for items inserted at `start`
    Added { start: usize, lambdas: Vec<LambdaRef> },
    /// Instances disposed for items removed from `start`
    Removed { start: usize, lambdas: Vec<LambdaRef> },
    /// Every instance was disposed and rebuilt
    Reset,
}

/// One instance's value changed.
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaValueChanged {
    pub id: LambdaId,
    pub item: Value,
    pub old: Value,
    pub new: Value,
}

struct LambdaEntry {
    id: LambdaId,
    item: Value,
    context: Rc<EvalContext>,
    operation: Rc<dyn Operation>,
    /// False when the body returned an operation bound in an enclosing scope
    owned: bool,
    subscription: Subscription,
}

impl LambdaEntry {
    fn to_ref(&self) -> LambdaRef {
        LambdaRef {
            id: self.id,
            item: self.item.clone(),
            value: self.operation.value(),
        }
    }

    fn dispose(self) {
        drop(self.subscription);
        if self.owned {
            self.operation.dispose();
        }
    }
}

fn dispose_all(entries: Vec<LambdaEntry>) {
    for entry in entries {
        entry.dispose();
    }
}

/// Maintains one lambda instance per source item.
pub struct LambdaContainer {
    this: Weak<Self>,
    context: Rc<EvalContext>,
    lambda: Lambda,
    link: SourceLink,
    entries: RefCell<Vec<LambdaEntry>>,
    next_id: Cell<LambdaId>,
    changed: Event<LambdaChange>,
    value_changed: Event<LambdaValueChanged>,
}

impl LambdaContainer {
    /// Creates a detached container evaluating `lambda` under `context`.
    pub fn new(context: Rc<EvalContext>, lambda: Lambda) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            context,
            lambda,
            link: SourceLink::new("lambda_container"),
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            changed: Event::new(),
            value_changed: Event::new(),
        })
    }

    /// Returns the structural change event.
    #[inline]
    pub fn changed(&self) -> &Event<LambdaChange> {
        &self.changed
    }

    /// Returns the per-instance value change event.
    #[inline]
    pub fn value_changed(&self) -> &Event<LambdaValueChanged> {
        &self.value_changed
    }

    /// Returns the context instances are derived from.
    #[inline]
    pub fn context(&self) -> &Rc<EvalContext> {
        &self.context
    }

    /// Returns the lambda.
    #[inline]
    pub fn lambda(&self) -> &Lambda {
        &self.lambda
    }

    /// Returns the number of instances.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if there are no instances.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns a snapshot of every instance in source order.
    pub fn lambdas(&self) -> Vec<LambdaRef> {
        let entries: Vec<(LambdaId, Value, Rc<dyn Operation>)> = self
            .entries
            .borrow()
            .iter()
            .map(|e| (e.id, e.item.clone(), e.operation.clone()))
            .collect();
        entries
            .into_iter()
            .map(|(id, item, op)| LambdaRef {
                id,
                item,
                value: op.value(),
            })
            .collect()
    }

    /// Returns the current instance values in source order.
    pub fn values(&self) -> Vec<Value> {
        self.lambdas().into_iter().map(|l| l.value).collect()
    }

    /// Returns the bound items in source order.
    pub fn items(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(|e| e.item.clone()).collect()
    }

    /// Returns the instance ids in source order.
    pub fn ids(&self) -> Vec<LambdaId> {
        self.entries.borrow().iter().map(|e| e.id).collect()
    }

    /// Returns the item bound to instance `id`.
    pub fn item(&self, id: LambdaId) -> Option<Value> {
        self.find(id, |e| e.item.clone())
    }

    /// Returns the current value of instance `id`.
    pub fn value(&self, id: LambdaId) -> Option<Value> {
        self.find(id, |e| e.operation.clone()).map(|op| op.value())
    }

    /// Returns the source position of instance `id`.
    pub fn position(&self, id: LambdaId) -> Option<usize> {
        self.entries.borrow().iter().position(|e| e.id == id)
    }

    /// Returns the derived context of instance `id`.
    pub fn context_of(&self, id: LambdaId) -> Option<Rc<EvalContext>> {
        self.find(id, |e| e.context.clone())
    }

    fn find<T>(&self, id: LambdaId, f: impl FnOnce(&LambdaEntry) -> T) -> Option<T> {
        self.entries.borrow().iter().find(|e| e.id == id).map(f)
    }

    fn build_entry(&self, item: Value) -> Result<LambdaEntry> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let context = EvalContext::for_item(&self.context, self.lambda.parameter(), item.clone());
        let operation = self.lambda.instantiate(&context)?;
        let owned = !self.context.binds(&operation);

        let this = self.this.clone();
        let subscription = operation
            .value_changed()
            .subscribe(move |change| match this.upgrade() {
                Some(container) => container.on_lambda_value_changed(id, change),
                None => Ok(()),
            });

        Ok(LambdaEntry {
            id,
            item,
            context,
            operation,
            owned,
            subscription,
        })
    }

    /// Builds an instance per item. Nothing survives a failure.
    fn build_entries(&self, items: &[Value]) -> Result<Vec<LambdaEntry>> {
        let mut built = Vec::with_capacity(items.len());
        for item in items {
            match self.build_entry(item.clone()) {
                Ok(entry) => built.push(entry),
                Err(err) => {
                    dispose_all(built);
                    return Err(err);
                }
            }
        }
        Ok(built)
    }

    fn inconsistent(&self, message: alloc::string::String) -> Error {
        warn!(operation = self.link.operation(), %message, "inconsistent source notification");
        Error::inconsistent(self.link.operation(), message)
    }

    fn on_source_changed(&self, change: &CollectionChange) -> Result<()> {
        match change {
            CollectionChange::Added { start, items } => self.on_added(*start, items),
            CollectionChange::Removed { start, items } => self.on_removed(*start, items),
            CollectionChange::Reset => self.on_reset(),
        }
    }

    fn on_added(&self, start: usize, items: &[Value]) -> Result<()> {
        let len = self.len();
        if start > len {
            return Err(self.inconsistent(format!(
                "insert at {} past the end of {} instances",
                start, len
            )));
        }
        if items.is_empty() {
            return Ok(());
        }

        let built = self.build_entries(items)?;
        let lambdas: Vec<LambdaRef> = built.iter().map(LambdaEntry::to_ref).collect();
        self.entries.borrow_mut().splice(start..start, built);

        trace!(start, count = lambdas.len(), "lambda instances added");
        self.changed.emit(&LambdaChange::Added { start, lambdas })
    }

    fn on_removed(&self, start: usize, items: &[Value]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let removed: Vec<LambdaEntry> = {
            let mut entries = self.entries.borrow_mut();
            let end = start.saturating_add(items.len());
            if end > entries.len() {
                let len = entries.len();
                drop(entries);
                return Err(self.inconsistent(format!(
                    "removal of {}..{} out of bounds for {} instances",
                    start, end, len
                )));
            }
            let mismatch = entries[start..end]
                .iter()
                .zip(items)
                .position(|(entry, item)| entry.item != *item);
            if let Some(offset) = mismatch {
                drop(entries);
                return Err(self.inconsistent(format!(
                    "removed item at {} does not match its instance",
                    start + offset
                )));
            }
            entries.drain(start..end).collect()
        };

        let lambdas: Vec<LambdaRef> = removed.iter().map(LambdaEntry::to_ref).collect();
        dispose_all(removed);

        trace!(start, count = lambdas.len(), "lambda instances removed");
        self.changed.emit(&LambdaChange::Removed { start, lambdas })
    }

    fn on_reset(&self) -> Result<()> {
        self.rebuild()?;
        self.changed.emit(&LambdaChange::Reset)
    }

    /// Replaces every instance with one built from the live source.
    ///
    /// The previous instances stay in place if building fails.
    fn rebuild(&self) -> Result<()> {
        let items = self.link.items();
        let built = self.build_entries(&items)?;
        let old = self.entries.replace(built);
        debug!(disposed = old.len(), built = items.len(), "lambda instances rebuilt");
        dispose_all(old);
        Ok(())
    }

    fn on_lambda_value_changed(&self, id: LambdaId, change: &ValueChange) -> Result<()> {
        // Teardown may race a pending notification: unknown ids are ignored.
        let Some(item) = self.item(id) else {
            return Ok(());
        };
        trace!(id, "lambda instance value changed");
        self.value_changed.emit(&LambdaValueChanged {
            id,
            item,
            old: change.old.clone(),
            new: change.new.clone(),
        })
    }
}

impl Attach for LambdaContainer {
    /// Attaches to `source`, builds an instance per item and raises a reset.
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()> {
        let this = self.this.clone();
        self.link.attach(source, move |change| match this.upgrade() {
            Some(container) => container.on_source_changed(change),
            None => Ok(()),
        })?;
        if let Err(err) = self.rebuild() {
            self.link.detach();
            return Err(err);
        }
        self.changed.emit(&LambdaChange::Reset)
    }

    /// Detaches from the source and disposes every instance without notifying.
    fn detach(&self) {
        self.link.detach();
        let old = self.entries.take();
        dispose_all(old);
    }

    fn is_attached(&self) -> bool {
        self.link.is_attached()
    }
}

impl fmt::Debug for LambdaContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaContainer")
            .field("lambda", &self.lambda)
            .field("len", &self.len())
            .field("attached", &self.link.is_attached())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{ComputedOperation, VariableOperation};
    use alloc::vec;
    use ripple_reactive::ObservableVec;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int64(v)).collect()
    }

    fn times_ten() -> Lambda {
        Lambda::map("x", |v| Ok(Value::Int64(v.as_i64().unwrap_or(0) * 10)))
    }

    fn attached(source: &Rc<ObservableVec>, lambda: Lambda) -> Rc<LambdaContainer> {
        let container = LambdaContainer::new(EvalContext::root(), lambda);
        container.attach(source.clone()).unwrap();
        container
    }

    fn record(container: &LambdaContainer) -> (Rc<RefCell<Vec<LambdaChange>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let sub = container.changed().subscribe(move |change| {
            l.borrow_mut().push(change.clone());
            Ok(())
        });
        (log, sub)
    }

    #[test]
    fn test_attach_builds_instances() {
        let source = Rc::new(ObservableVec::from_values([1i64, 2, 3]));
        let container = LambdaContainer::new(EvalContext::root(), times_ten());
        let (log, _sub) = record(&container);

        container.attach(source.clone()).unwrap();

        assert_eq!(container.items(), ints(&[1, 2, 3]));
        assert_eq!(container.values(), ints(&[10, 20, 30]));
        assert_eq!(*log.borrow(), vec![LambdaChange::Reset]);
    }

    #[test]
    fn test_attach_twice_fails() {
        let source = Rc::new(ObservableVec::from_values([1i64]));
        let container = attached(&source, times_ten());

        let err = container.attach(source.clone()).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_empty_source() {
        let source = Rc::new(ObservableVec::new());
        let container = attached(&source, times_ten());
        assert!(container.is_empty());
        assert!(container.lambdas().is_empty());
    }

    #[test]
    fn test_insert_mirrors_position() {
        let source = Rc::new(ObservableVec::from_values([1i64, 4]));
        let container = attached(&source, times_ten());
        let (log, _sub) = record(&container);

        source.insert_range(1, ints(&[2, 3])).unwrap();

        assert_eq!(container.values(), ints(&[10, 20, 30, 40]));
        let log = log.borrow();
        match &log[0] {
            LambdaChange::Added { start, lambdas } => {
                assert_eq!(*start, 1);
                let values: Vec<Value> = lambdas.iter().map(|l| l.value.clone()).collect();
                assert_eq!(values, ints(&[20, 30]));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_duplicates_get_independent_instances() {
        let source = Rc::new(ObservableVec::from_values([7i64, 7, 7]));
        let container = attached(&source, times_ten());

        let ids = container.ids();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);

        let a = container.context_of(ids[0]).unwrap();
        let b = container.context_of(ids[1]).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));

        // Removing the middle occurrence drops exactly that instance
        source.remove_at(1).unwrap();
        assert_eq!(container.ids(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_unchanged_items_keep_their_instances() {
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = attached(&source, times_ten());
        let ids = container.ids();
        let context = container.context_of(ids[1]).unwrap();

        source.insert(0, Value::Int64(0)).unwrap();

        assert_eq!(container.position(ids[1]), Some(2));
        assert!(Rc::ptr_eq(&container.context_of(ids[1]).unwrap(), &context));
    }

    #[test]
    fn test_remove_disposes_instances() {
        let var = VariableOperation::new(Value::Int64(1));
        let v = var.clone();
        let lambda = Lambda::new("x", move |ctx| {
            let item = ctx.resolve("x")?;
            let op: Rc<dyn Operation> = ComputedOperation::new(
                vec![item, v.clone() as Rc<dyn Operation>],
                |values| Ok(Value::Int64(values.iter().filter_map(Value::as_i64).sum())),
            )?;
            Ok(op)
        });
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = attached(&source, lambda);
        assert_eq!(var.value_changed().listener_count(), 2);

        source.remove_at(0).unwrap();
        assert_eq!(var.value_changed().listener_count(), 1);

        container.detach();
        assert_eq!(var.value_changed().listener_count(), 0);
    }

    #[test]
    fn test_reset_rebuilds_without_leaks() {
        let var = VariableOperation::new(Value::Int64(0));
        let v = var.clone();
        let lambda = Lambda::new("x", move |ctx| {
            let item = ctx.resolve("x")?;
            let op: Rc<dyn Operation> =
                ComputedOperation::new(vec![item, v.clone() as Rc<dyn Operation>], |values| {
                    Ok(values[0].clone())
                })?;
            Ok(op)
        });
        let source = Rc::new(ObservableVec::from_values([1i64, 2, 3]));
        let container = attached(&source, lambda);
        let old_ids = container.ids();
        let (log, _sub) = record(&container);

        source.replace_all(ints(&[4, 5])).unwrap();

        assert_eq!(container.items(), ints(&[4, 5]));
        assert!(container.ids().iter().all(|id| !old_ids.contains(id)));
        assert_eq!(var.value_changed().listener_count(), 2);
        assert_eq!(*log.borrow(), vec![LambdaChange::Reset]);
    }

    #[test]
    fn test_value_changed_reports_instance() {
        let offset = VariableOperation::new(Value::Int64(0));
        let o = offset.clone();
        let lambda = Lambda::new("x", move |ctx| {
            let item = ctx.resolve("x")?;
            let op: Rc<dyn Operation> =
                ComputedOperation::new(vec![item, o.clone() as Rc<dyn Operation>], |values| {
                    Ok(Value::Int64(values.iter().filter_map(Value::as_i64).sum()))
                })?;
            Ok(op)
        });
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = attached(&source, lambda);
        let (structural, _s) = record(&container);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = container.value_changed().subscribe(move |change| {
            s.borrow_mut().push(change.clone());
            Ok(())
        });

        offset.set(Value::Int64(100)).unwrap();

        let ids = container.ids();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].id, ids[0]);
        assert_eq!(seen[0].item, Value::Int64(1));
        assert_eq!(seen[0].old, Value::Int64(1));
        assert_eq!(seen[0].new, Value::Int64(101));
        assert!(structural.borrow().is_empty());
    }

    #[test]
    fn test_inconsistent_removal_is_reported() {
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = attached(&source, times_ten());

        let err = container
            .on_source_changed(&CollectionChange::removed(1, ints(&[9])))
            .unwrap_err();
        assert!(err.is_inconsistency());
        assert_eq!(container.items(), ints(&[1, 2]));

        let err = container
            .on_source_changed(&CollectionChange::removed(1, ints(&[2, 3])))
            .unwrap_err();
        assert!(err.is_inconsistency());

        let err = container
            .on_source_changed(&CollectionChange::added(5, ints(&[3])))
            .unwrap_err();
        assert!(err.is_inconsistency());
    }

    #[test]
    fn test_failed_insert_keeps_state() {
        let lambda = Lambda::map("x", |v| match v.as_i64() {
            Some(n) => Ok(Value::Int64(n)),
            None => Err(Error::evaluation("not an integer")),
        });
        let source = Rc::new(ObservableVec::from_values([1i64]));
        let container = attached(&source, lambda);
        let (log, _sub) = record(&container);

        let err = source
            .insert_range(1, vec![Value::Int64(2), Value::String("x".into())])
            .unwrap_err();
        assert_eq!(err, Error::evaluation("not an integer"));
        assert_eq!(container.items(), ints(&[1]));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_attach_detaches() {
        let lambda = Lambda::map("x", |_| Err(Error::evaluation("boom")));
        let source = Rc::new(ObservableVec::from_values([1i64]));
        let container = LambdaContainer::new(EvalContext::root(), lambda);

        assert!(container.attach(source.clone()).is_err());
        assert!(!container.is_attached());
        assert_eq!(source.collection_changed().listener_count(), 0);
    }

    #[test]
    fn test_detach_is_idempotent_and_silent() {
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = attached(&source, times_ten());
        let (log, _sub) = record(&container);

        container.detach();
        container.detach();
        source.push(Value::Int64(3)).unwrap();

        assert!(container.is_empty());
        assert!(log.borrow().is_empty());
        assert_eq!(source.collection_changed().listener_count(), 0);
    }

    #[test]
    fn test_lambda_sees_root_bindings() {
        let root = EvalContext::builder().bind_value("factor", 3i64).build();
        let lambda = Lambda::new("x", |ctx| {
            let item = ctx.resolve("x")?;
            let factor = ctx.resolve("factor")?;
            let op: Rc<dyn Operation> = ComputedOperation::new(vec![item, factor], |values| {
                Ok(Value::Int64(values.iter().filter_map(Value::as_i64).product()))
            })?;
            Ok(op)
        });
        let source = Rc::new(ObservableVec::from_values([2i64, 5]));
        let container = LambdaContainer::new(root, lambda);
        container.attach(source.clone()).unwrap();

        assert_eq!(container.values(), ints(&[6, 15]));
    }

    #[test]
    fn test_shared_root_operation_survives_removal() {
        let input = VariableOperation::new(Value::Int64(1));
        let shared = ComputedOperation::new(vec![input.clone() as Rc<dyn Operation>], |values| {
            Ok(values[0].clone())
        })
        .unwrap();
        let root = EvalContext::builder()
            .bind("threshold", shared.clone())
            .build();
        let lambda = Lambda::new("x", |ctx| ctx.resolve("threshold"));
        let source = Rc::new(ObservableVec::from_values([1i64, 2]));
        let container = LambdaContainer::new(root, lambda);
        container.attach(source.clone()).unwrap();

        source.remove_at(0).unwrap();
        container.detach();

        assert!(!shared.is_disposed());
        input.set(Value::Int64(7)).unwrap();
        assert_eq!(shared.value(), Value::Int64(7));
    }
}

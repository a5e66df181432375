//! Scalar leaf operations.
//!
//! - `ConstantOperation`: a plain value wrapped as a zero-dependency operation
//! - `VariableOperation`: an externally settable value
//! - `ComputedOperation`: a function over input operations, recomputed when any input changes

use crate::operation::Operation;
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use ripple_core::{Result, Value};
use ripple_reactive::{Event, Observable, Subscription, ValueChange};

/// A value wrapped as an operation. Never changes.
#[derive(Debug)]
pub struct ConstantOperation {
    value: Value,
    value_changed: Event<ValueChange>,
}

impl ConstantOperation {
    /// Wraps `value`.
    pub fn new(value: Value) -> Rc<Self> {
        Rc::new(Self {
            value,
            value_changed: Event::new(),
        })
    }
}

impl Observable for ConstantOperation {
    fn value(&self) -> Value {
        self.value.clone()
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl Operation for ConstantOperation {
    fn dispose(&self) {}
}

/// A value owned outside the graph that lambdas may depend on.
#[derive(Debug)]
pub struct VariableOperation {
    value: RefCell<Value>,
    value_changed: Event<ValueChange>,
}

impl VariableOperation {
    /// Creates a variable holding `value`.
    pub fn new(value: Value) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            value_changed: Event::new(),
        })
    }

    /// Sets the value, notifying listeners if it differs from the current one.
    ///
    /// The new value is kept even if a listener fails.
    pub fn set(&self, value: Value) -> Result<()> {
        if *self.value.borrow() == value {
            return Ok(());
        }
        let old = self.value.replace(value.clone());
        self.value_changed.emit(&ValueChange::new(old, value))
    }
}

impl Observable for VariableOperation {
    fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl Operation for VariableOperation {
    fn dispose(&self) {}
}

type ComputeFn = Box<dyn Fn(&[Value]) -> Result<Value>>;

/// A value derived from other operations.
///
/// Inputs are not owned: disposing a computed operation only removes its
/// listeners from them.
pub struct ComputedOperation {
    inputs: Vec<Rc<dyn Operation>>,
    compute: ComputeFn,
    value: RefCell<Value>,
    value_changed: Event<ValueChange>,
    subscriptions: RefCell<Vec<Subscription>>,
    disposed: Cell<bool>,
}

impl ComputedOperation {
    /// Creates a computed operation and evaluates it eagerly.
    pub fn new<F>(inputs: Vec<Rc<dyn Operation>>, compute: F) -> Result<Rc<Self>>
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        let values: Vec<Value> = inputs.iter().map(|op| op.value()).collect();
        let initial = compute(&values)?;

        Ok(Rc::new_cyclic(|this: &Weak<Self>| {
            let subscriptions = inputs
                .iter()
                .map(|input| {
                    let this = this.clone();
                    input.value_changed().subscribe(move |_| match this.upgrade() {
                        Some(op) => op.recompute(),
                        None => Ok(()),
                    })
                })
                .collect();

            Self {
                inputs,
                compute: Box::new(compute),
                value: RefCell::new(initial),
                value_changed: Event::new(),
                subscriptions: RefCell::new(subscriptions),
                disposed: Cell::new(false),
            }
        }))
    }

    /// Returns true once the operation has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Re-evaluates from the current input values.
    ///
    /// On error the previous value stays published.
    fn recompute(&self) -> Result<()> {
        if self.disposed.get() {
            return Ok(());
        }
        let values: Vec<Value> = self.inputs.iter().map(|op| op.value()).collect();
        let new = (self.compute)(&values)?;
        if *self.value.borrow() == new {
            return Ok(());
        }
        let old = self.value.replace(new.clone());
        self.value_changed.emit(&ValueChange::new(old, new))
    }
}

impl Observable for ComputedOperation {
    fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl Operation for ComputedOperation {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let subscriptions = core::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }
}

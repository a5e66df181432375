//! Aggregate operators.
//!
//! An `AggregateOperation` publishes one value computed from its source
//! sequence and, optionally, from a per-item lambda container. Every relevant
//! upstream event triggers a full recalculation over the current state; the
//! result is only republished when it differs from the previous one.

use crate::context::EvalContext;
use crate::lambda::{LambdaChange, LambdaContainer, LambdaValueChanged};
use crate::operation::{Attach, Lambda, Operation};
use crate::source::SourceLink;
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::ops::Deref;
use ripple_core::{DataType, Error, Result, Value};
use ripple_reactive::{Event, Observable, ObservableSequence, Subscription, ValueChange};
use tracing::{debug, trace};

/// The state an aggregate is recalculated from.
#[derive(Clone, Copy, Debug)]
pub struct AggregateState<'a> {
    items: &'a [Value],
    lambda_values: Option<&'a [Value]>,
}

impl<'a> AggregateState<'a> {
    /// Creates a state over source items and, if any, the per-item lambda values.
    pub fn new(items: &'a [Value], lambda_values: Option<&'a [Value]>) -> Self {
        Self {
            items,
            lambda_values,
        }
    }

    /// Returns the current source items.
    #[inline]
    pub fn items(&self) -> &'a [Value] {
        self.items
    }

    /// Returns the per-item lambda values, positionally matching `items`.
    #[inline]
    pub fn lambda_values(&self) -> Option<&'a [Value]> {
        self.lambda_values
    }

    /// Returns the lambda values when present, the items otherwise.
    #[inline]
    pub fn values(&self) -> &'a [Value] {
        self.lambda_values.unwrap_or(self.items)
    }

    /// Returns the number of source items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the source is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Recalculates an aggregate from scratch.
pub type Recalculate = Box<dyn Fn(&AggregateState<'_>) -> Result<Value>>;

fn boxed<F>(recalculate: F) -> Recalculate
where
    F: Fn(&AggregateState<'_>) -> Result<Value> + 'static,
{
    Box::new(recalculate)
}

/// Built-in aggregates.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateKind {
    /// Number of items
    Count,
    /// Whether an item equals the value
    Contains(Value),
    /// Whether there is at least one item
    Any,
    /// The first item, or null
    First,
    /// The last item, or null
    Last,
    /// Sum of the non-null numeric values
    Sum,
    /// Mean of the non-null numeric values, or null
    Average,
    /// Smallest non-null value, or null
    Min,
    /// Largest non-null value, or null
    Max,
    /// Number of items whose predicate holds
    CountWhere,
    /// Whether any predicate holds
    AnyWhere,
    /// Whether every predicate holds
    AllWhere,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LambdaUse {
    Never,
    Optional,
    Required,
}

impl AggregateKind {
    /// Returns the operator name.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Contains(_) => "contains",
            AggregateKind::Any => "any",
            AggregateKind::First => "first",
            AggregateKind::Last => "last",
            AggregateKind::Sum => "sum",
            AggregateKind::Average => "average",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::CountWhere => "count_where",
            AggregateKind::AnyWhere => "any_where",
            AggregateKind::AllWhere => "all_where",
        }
    }

    fn lambda_use(&self) -> LambdaUse {
        match self {
            AggregateKind::Count
            | AggregateKind::Contains(_)
            | AggregateKind::Any
            | AggregateKind::First
            | AggregateKind::Last => LambdaUse::Never,
            AggregateKind::Sum
            | AggregateKind::Average
            | AggregateKind::Min
            | AggregateKind::Max => LambdaUse::Optional,
            AggregateKind::CountWhere | AggregateKind::AnyWhere | AggregateKind::AllWhere => {
                LambdaUse::Required
            }
        }
    }

    /// Returns true if the aggregate reads per-item predicates.
    pub fn is_predicate(&self) -> bool {
        self.lambda_use() == LambdaUse::Required
    }

    /// Computes the aggregate over `state`.
    ///
    /// Never fails on an empty state.
    pub fn compute(&self, state: &AggregateState<'_>) -> Result<Value> {
        let items = state.items();
        match self {
            AggregateKind::Count => Ok(Value::Int64(items.len() as i64)),
            AggregateKind::Contains(value) => Ok(Value::Boolean(items.contains(value))),
            AggregateKind::Any => Ok(Value::Boolean(!items.is_empty())),
            AggregateKind::First => Ok(items.first().cloned().unwrap_or_default()),
            AggregateKind::Last => Ok(items.last().cloned().unwrap_or_default()),
            AggregateKind::Sum => sum(state.values()),
            AggregateKind::Average => average(state.values()),
            AggregateKind::Min => Ok(non_null(state.values()).min().cloned().unwrap_or_default()),
            AggregateKind::Max => Ok(non_null(state.values()).max().cloned().unwrap_or_default()),
            AggregateKind::CountWhere => {
                let count = predicates(state.values())?.into_iter().filter(|&p| p).count();
                Ok(Value::Int64(count as i64))
            }
            AggregateKind::AnyWhere => {
                Ok(Value::Boolean(predicates(state.values())?.into_iter().any(|p| p)))
            }
            AggregateKind::AllWhere => {
                Ok(Value::Boolean(predicates(state.values())?.into_iter().all(|p| p)))
            }
        }
    }
}

fn non_null(values: &[Value]) -> impl Iterator<Item = &Value> {
    values.iter().filter(|v| !v.is_null())
}

fn extract_numeric(value: &Value) -> Result<f64> {
    value
        .as_numeric()
        .ok_or_else(|| Error::type_mismatch(DataType::Float64, value.data_type()))
}

/// Sums integers exactly; any float widens the result to float.
fn sum(values: &[Value]) -> Result<Value> {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;
    let mut has_float = false;
    for value in non_null(values) {
        match value {
            Value::Int64(n) => {
                int_sum = int_sum.and_then(|s| s.checked_add(*n));
                float_sum += *n as f64;
            }
            Value::Float64(f) => {
                has_float = true;
                float_sum += f;
            }
            other => return Err(Error::type_mismatch(DataType::Float64, other.data_type())),
        }
    }
    if has_float {
        return Ok(Value::Float64(float_sum));
    }
    int_sum
        .map(Value::Int64)
        .ok_or_else(|| Error::evaluation("integer overflow in sum"))
}

fn average(values: &[Value]) -> Result<Value> {
    let mut total = 0.0;
    let mut count = 0usize;
    for value in non_null(values) {
        total += extract_numeric(value)?;
        count += 1;
    }
    if count == 0 {
        return Ok(Value::Null);
    }
    Ok(Value::Float64(total / count as f64))
}

fn predicates(values: &[Value]) -> Result<Vec<bool>> {
    values
        .iter()
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| Error::type_mismatch(DataType::Boolean, v.data_type()))
        })
        .collect()
}

/// A scalar operation recalculated from its whole source on every change.
pub struct AggregateOperation {
    this: Weak<Self>,
    name: &'static str,
    link: SourceLink,
    lambdas: Option<Rc<LambdaContainer>>,
    _lambda_subscriptions: Vec<Subscription>,
    recalculate: Recalculate,
    value: RefCell<Value>,
    value_changed: Event<ValueChange>,
}

impl AggregateOperation {
    /// Creates a built-in aggregate over the source items.
    ///
    /// Fails with `NotSupported` if `kind` needs per-item predicates.
    pub fn new(kind: AggregateKind) -> Result<Rc<Self>> {
        if kind.lambda_use() == LambdaUse::Required {
            return Err(Error::not_supported(kind.name()));
        }
        let name = kind.name();
        Self::build(name, None, boxed(move |state| kind.compute(state)))
    }

    /// Creates a built-in aggregate over per-item lambda values.
    ///
    /// Fails with `NotSupported` if `kind` only reads source items.
    pub fn with_lambda(
        context: Rc<EvalContext>,
        kind: AggregateKind,
        lambda: Lambda,
    ) -> Result<Rc<Self>> {
        if kind.lambda_use() == LambdaUse::Never {
            return Err(Error::not_supported(kind.name()));
        }
        let name = kind.name();
        let container = LambdaContainer::new(context, lambda);
        Self::build(name, Some(container), boxed(move |state| kind.compute(state)))
    }

    /// Creates an aggregate from a user recalculation over the source items.
    pub fn custom<F>(recalculate: F) -> Result<Rc<Self>>
    where
        F: Fn(&AggregateState<'_>) -> Result<Value> + 'static,
    {
        Self::build("custom", None, boxed(recalculate))
    }

    /// Creates an aggregate from a user recalculation over items and lambda values.
    pub fn custom_with_lambda<F>(
        context: Rc<EvalContext>,
        lambda: Lambda,
        recalculate: F,
    ) -> Result<Rc<Self>>
    where
        F: Fn(&AggregateState<'_>) -> Result<Value> + 'static,
    {
        let container = LambdaContainer::new(context, lambda);
        Self::build("custom", Some(container), boxed(recalculate))
    }

    fn build(
        name: &'static str,
        lambdas: Option<Rc<LambdaContainer>>,
        recalculate: Recalculate,
    ) -> Result<Rc<Self>> {
        let empty: Vec<Value> = Vec::new();
        let state = AggregateState::new(&empty, lambdas.as_ref().map(|_| &empty[..]));
        let initial = recalculate(&state)?;

        Ok(Rc::new_cyclic(|this: &Weak<Self>| {
            let mut subscriptions = Vec::new();
            if let Some(container) = &lambdas {
                let w = this.clone();
                subscriptions.push(container.changed().subscribe(move |_: &LambdaChange| {
                    match w.upgrade() {
                        Some(op) => op.on_upstream_changed(),
                        None => Ok(()),
                    }
                }));
                let w = this.clone();
                subscriptions.push(container.value_changed().subscribe(
                    move |_: &LambdaValueChanged| match w.upgrade() {
                        Some(op) => op.on_upstream_changed(),
                        None => Ok(()),
                    },
                ));
            }

            Self {
                this: this.clone(),
                name,
                link: SourceLink::new(name),
                lambdas,
                _lambda_subscriptions: subscriptions,
                recalculate,
                value: RefCell::new(initial),
                value_changed: Event::new(),
            }
        }))
    }

    /// Returns the operator name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the per-item lambda container, if the aggregate has one.
    #[inline]
    pub fn lambdas(&self) -> Option<&Rc<LambdaContainer>> {
        self.lambdas.as_ref()
    }

    /// Computes the aggregate over the current state without publishing it.
    pub fn recalculate(&self) -> Result<Value> {
        match &self.lambdas {
            Some(container) => {
                let items = container.items();
                let values = container.values();
                (self.recalculate)(&AggregateState::new(&items, Some(&values)))
            }
            None => {
                let items = self.link.items();
                (self.recalculate)(&AggregateState::new(&items, None))
            }
        }
    }

    /// Recalculates and publishes the result if it changed.
    ///
    /// A failed recalculation leaves the previous value published.
    pub fn reset_value(&self) -> Result<()> {
        let new = self.recalculate()?;
        trace!(operation = self.name, "aggregate recalculated");
        if *self.value.borrow() == new {
            return Ok(());
        }
        let old = self.value.replace(new.clone());
        self.value_changed.emit(&ValueChange::new(old, new))
    }

    fn on_upstream_changed(&self) -> Result<()> {
        if !self.is_attached() {
            return Ok(());
        }
        self.reset_value()
    }
}

impl Attach for AggregateOperation {
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()> {
        if self.is_attached() {
            return Err(Error::already_attached(self.name));
        }
        match &self.lambdas {
            // The container's reset drives the first recalculation
            Some(container) => container.attach(source),
            None => {
                let this = self.this.clone();
                self.link.attach(source, move |_| match this.upgrade() {
                    Some(op) => op.on_upstream_changed(),
                    None => Ok(()),
                })?;
                self.reset_value()
            }
        }
    }

    fn detach(&self) {
        if let Some(container) = &self.lambdas {
            container.detach();
        }
        if self.link.detach() {
            debug!(operation = self.name, "aggregate detached");
        }
    }

    fn is_attached(&self) -> bool {
        match &self.lambdas {
            Some(container) => container.is_attached(),
            None => self.link.is_attached(),
        }
    }
}

impl Observable for AggregateOperation {
    fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn value_changed(&self) -> &Event<ValueChange> {
        &self.value_changed
    }
}

impl Operation for AggregateOperation {
    fn dispose(&self) {
        self.detach();
    }
}

impl fmt::Debug for AggregateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateOperation")
            .field("name", &self.name)
            .field("value", &*self.value.borrow())
            .field("lambdas", &self.lambdas)
            .finish_non_exhaustive()
    }
}

/// An aggregate over per-item projections.
#[derive(Clone, Debug)]
pub struct ProjectionAggregate(Rc<AggregateOperation>);

impl ProjectionAggregate {
    /// Creates a built-in projection aggregate such as `Sum` or `Max`.
    pub fn new(context: Rc<EvalContext>, kind: AggregateKind, lambda: Lambda) -> Result<Self> {
        if kind.is_predicate() {
            return Err(Error::not_supported(kind.name()));
        }
        AggregateOperation::with_lambda(context, kind, lambda).map(Self)
    }

    /// Creates a projection aggregate with a user recalculation.
    pub fn custom<F>(context: Rc<EvalContext>, lambda: Lambda, recalculate: F) -> Result<Self>
    where
        F: Fn(&AggregateState<'_>) -> Result<Value> + 'static,
    {
        AggregateOperation::custom_with_lambda(context, lambda, recalculate).map(Self)
    }

    /// Returns the current projection of every item, in source order.
    pub fn projections(&self) -> Vec<Value> {
        self.0.lambdas().map(|c| c.values()).unwrap_or_default()
    }

    /// Returns the underlying operation.
    #[inline]
    pub fn operation(&self) -> &Rc<AggregateOperation> {
        &self.0
    }
}

impl Deref for ProjectionAggregate {
    type Target = AggregateOperation;

    fn deref(&self) -> &AggregateOperation {
        &self.0
    }
}

/// An aggregate over per-item boolean predicates.
#[derive(Clone, Debug)]
pub struct PredicateAggregate(Rc<AggregateOperation>);

impl PredicateAggregate {
    /// Creates a built-in predicate aggregate such as `CountWhere`.
    pub fn new(context: Rc<EvalContext>, kind: AggregateKind, predicate: Lambda) -> Result<Self> {
        if !kind.is_predicate() {
            return Err(Error::not_supported(kind.name()));
        }
        AggregateOperation::with_lambda(context, kind, predicate).map(Self)
    }

    /// Creates a `CountWhere` aggregate.
    pub fn count_where(context: Rc<EvalContext>, predicate: Lambda) -> Result<Self> {
        Self::new(context, AggregateKind::CountWhere, predicate)
    }

    /// Creates an `AnyWhere` aggregate.
    pub fn any_where(context: Rc<EvalContext>, predicate: Lambda) -> Result<Self> {
        Self::new(context, AggregateKind::AnyWhere, predicate)
    }

    /// Creates an `AllWhere` aggregate.
    pub fn all_where(context: Rc<EvalContext>, predicate: Lambda) -> Result<Self> {
        Self::new(context, AggregateKind::AllWhere, predicate)
    }

    /// Returns the current predicate result of every item, in source order.
    pub fn predicates(&self) -> Result<Vec<bool>> {
        let values = self.0.lambdas().map(|c| c.values()).unwrap_or_default();
        predicates(&values)
    }

    /// Returns the underlying operation.
    #[inline]
    pub fn operation(&self) -> &Rc<AggregateOperation> {
        &self.0
    }
}

impl Deref for PredicateAggregate {
    type Target = AggregateOperation;

    fn deref(&self) -> &AggregateOperation {
        &self.0
    }
}

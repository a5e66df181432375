//! Operation node traits and per-item lambdas.

use crate::context::EvalContext;
use crate::scalar::ComputedOperation;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use core::fmt;
use ripple_core::{Result, Value};
use ripple_reactive::{Observable, ObservableSequence};

/// A node of the operation graph.
///
/// Every operation publishes a current value and notifies on change. An
/// operation is owned by exactly one parent; `dispose` releases the node's
/// subscriptions and owned children and must be safe to call repeatedly.
pub trait Operation: Observable {
    /// Releases subscriptions and owned children. Idempotent.
    fn dispose(&self);
}

/// A node that follows exactly one upstream sequence.
pub trait Attach {
    /// Subscribes to `source` and builds the node's state from it.
    ///
    /// Fails with `Error::AlreadyAttached` if the node already follows a source.
    fn attach(&self, source: Rc<dyn ObservableSequence>) -> Result<()>;

    /// Unsubscribes from the source. Idempotent.
    fn detach(&self);

    /// Returns true while the node follows a source.
    fn is_attached(&self) -> bool;
}

/// Builds the operation for one lambda instance in its derived context.
pub type LambdaBody = Rc<dyn Fn(&Rc<EvalContext>) -> Result<Rc<dyn Operation>>>;

/// A single-parameter lambda: the per-item computation of an operator.
#[derive(Clone)]
pub struct Lambda {
    parameter: String,
    body: LambdaBody,
}

impl Lambda {
    /// Creates a lambda whose body is built by `body`.
    pub fn new<F>(parameter: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Rc<EvalContext>) -> Result<Rc<dyn Operation>> + 'static,
    {
        Self {
            parameter: parameter.into(),
            body: Rc::new(body),
        }
    }

    /// Creates a lambda that depends only on the bound item.
    pub fn map<F>(parameter: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        let parameter = parameter.into();
        let name = parameter.clone();
        let f = Rc::new(f);
        Self::new(parameter, move |ctx| {
            let item = ctx.resolve(&name)?;
            let f = f.clone();
            let op: Rc<dyn Operation> =
                ComputedOperation::new(vec![item], move |values| f(&values[0]))?;
            Ok(op)
        })
    }

    /// Creates the identity lambda `x => x`.
    pub fn identity(parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        let name = parameter.clone();
        Self::new(parameter, move |ctx| ctx.resolve(&name))
    }

    /// Returns the parameter name.
    #[inline]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// Builds the body in `context`.
    pub fn instantiate(&self, context: &Rc<EvalContext>) -> Result<Rc<dyn Operation>> {
        (self.body)(context)
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("parameter", &self.parameter)
            .finish_non_exhaustive()
    }
}

//! Evaluation contexts.
//!
//! An `EvalContext` maps names to bound operations and falls back to its
//! parent when a name is not bound locally. A query root gets one context;
//! every per-item lambda instance gets a derived context that binds the item
//! to the lambda's parameter.
//!
//! Contexts are immutable once built and shared through `Rc`, so a derived
//! context's identity stays stable for the lifetime of the lambda instance
//! evaluated in it.

use crate::operation::Operation;
use crate::scalar::ConstantOperation;
use alloc::rc::Rc;
use alloc::string::String;
use core::fmt;
use hashbrown::HashMap;
use ripple_core::{Error, Result, Value};
use ripple_reactive::Observable;

/// A lexical scope of named operations.
pub struct EvalContext {
    parent: Option<Rc<EvalContext>>,
    variables: HashMap<String, Rc<dyn Operation>>,
}

impl EvalContext {
    /// Creates an empty root context.
    pub fn root() -> Rc<Self> {
        Self::builder().build()
    }

    /// Starts building a root context.
    pub fn builder() -> EvalContextBuilder {
        EvalContextBuilder {
            parent: None,
            variables: HashMap::new(),
        }
    }

    /// Starts building a context chained to `parent`.
    pub fn child_of(parent: &Rc<EvalContext>) -> EvalContextBuilder {
        EvalContextBuilder {
            parent: Some(parent.clone()),
            variables: HashMap::new(),
        }
    }

    /// Creates the derived context for one source item.
    ///
    /// The only local binding is `parameter`, bound to a constant operation
    /// wrapping `item`.
    pub fn for_item(parent: &Rc<EvalContext>, parameter: &str, item: Value) -> Rc<Self> {
        Self::child_of(parent)
            .bind(parameter, ConstantOperation::new(item))
            .build()
    }

    /// Returns the parent context, if any.
    #[inline]
    pub fn parent(&self) -> Option<&Rc<EvalContext>> {
        self.parent.as_ref()
    }

    /// Returns true if `name` is bound in this scope itself.
    pub fn is_local(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Looks `name` up, walking the parent chain on a miss.
    pub fn get(&self, name: &str) -> Option<Rc<dyn Operation>> {
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if let Some(op) = ctx.variables.get(name) {
                return Some(op.clone());
            }
            scope = ctx.parent.as_deref();
        }
        None
    }

    /// Returns true if some scope in the chain binds this exact operation.
    pub fn binds(&self, operation: &Rc<dyn Operation>) -> bool {
        let target = Rc::as_ptr(operation).cast::<()>();
        let mut scope = Some(self);
        while let Some(ctx) = scope {
            if ctx
                .variables
                .values()
                .any(|op| Rc::as_ptr(op).cast::<()>() == target)
            {
                return true;
            }
            scope = ctx.parent.as_deref();
        }
        false
    }

    /// Looks `name` up, failing if no scope binds it.
    pub fn resolve(&self, name: &str) -> Result<Rc<dyn Operation>> {
        self.get(name).ok_or_else(|| Error::unbound_variable(name))
    }

    /// Returns the current value bound to `name`.
    pub fn value_of(&self, name: &str) -> Result<Value> {
        self.resolve(name).map(|op| op.value())
    }

    /// Returns the number of scopes from this context up to the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.parent.as_deref();
        while let Some(ctx) = scope {
            depth += 1;
            scope = ctx.parent.as_deref();
        }
        depth
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: alloc::vec::Vec<&str> = self.variables.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EvalContext")
            .field("variables", &names)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Builder for [`EvalContext`].
pub struct EvalContextBuilder {
    parent: Option<Rc<EvalContext>>,
    variables: HashMap<String, Rc<dyn Operation>>,
}

impl EvalContextBuilder {
    /// Binds `name` to an operation, shadowing any parent binding.
    pub fn bind(mut self, name: impl Into<String>, operation: Rc<dyn Operation>) -> Self {
        self.variables.insert(name.into(), operation);
        self
    }

    /// Binds `name` to a constant value.
    pub fn bind_value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, ConstantOperation::new(value.into()))
    }

    /// Finishes the context.
    pub fn build(self) -> Rc<EvalContext> {
        Rc::new(EvalContext {
            parent: self.parent,
            variables: self.variables,
        })
    }
}

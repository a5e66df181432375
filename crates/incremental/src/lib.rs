//! Ripple Incremental - Live operation graphs for Ripple queries.
//!
//! This crate implements the runtime nodes of a live query. Each node holds
//! an intermediate or final result, subscribes to its upstream's change
//! notifications and republishes only what changed.
//!
//! # Core Concepts
//!
//! - `EvalContext`: a chained scope of named operations
//! - `Operation`/`Attach`: the node surface and its source lifecycle
//! - `Lambda`: a per-item computation built in a derived context
//! - `LambdaContainer`: one live lambda instance per source item
//!
//! # Operators
//!
//! - `SourceOperation`: pass-through of its upstream
//! - `SelectOperation`: per-item projection
//! - `AggregateOperation`: full recalculation on every relevant change, with
//!   `ProjectionAggregate` and `PredicateAggregate` as typed views
//! - `OrderByOperation`: sorted view over an ordered multiset of keys
//!
//! # Example
//!
//! ```ignore
//! use ripple_incremental::{Attach, EvalContext, Lambda, OrderByOperation};
//! use ripple_reactive::{ObservableSequence, ObservableVec};
//! use std::rc::Rc;
//!
//! let source = Rc::new(ObservableVec::from_values([3i64, 1, 2]));
//! let view = OrderByOperation::order_by(EvalContext::root(), Lambda::identity("x"));
//! view.attach(source.clone())?;
//! assert_eq!(view.items(), vec![1i64.into(), 2i64.into(), 3i64.into()]);
//!
//! source.insert(0, 0i64.into())?;
//! assert_eq!(view.len(), 4);
//! ```

#![no_std]

extern crate alloc;

pub mod context;
pub mod lambda;
pub mod operation;
pub mod operators;
pub mod scalar;
pub mod source;

pub use context::{EvalContext, EvalContextBuilder};
pub use lambda::{LambdaChange, LambdaContainer, LambdaId, LambdaRef, LambdaValueChanged};
pub use operation::{Attach, Lambda, LambdaBody, Operation};
pub use operators::{
    AggregateKind, AggregateOperation, AggregateState, OrderByOperation, PredicateAggregate,
    ProjectionAggregate, Recalculate, SelectOperation,
};
pub use scalar::{ComputedOperation, ConstantOperation, VariableOperation};
pub use source::{SourceLink, SourceOperation};

// Re-export commonly used types from dependencies
pub use ripple_core::{Error, Order, Result, Value};
pub use ripple_reactive::{
    CollectionChange, Observable, ObservableSequence, ObservableVec, ValueChange,
};

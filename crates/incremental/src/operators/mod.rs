//! Operators over sequences.
//!
//! Each operator belongs to one incrementality class:
//! - Aggregate: a scalar recalculated from scratch on every relevant change
//! - OrderBy: a sorted view maintained incrementally over an ordered multiset
//! - Select: a per-item projection mirroring its source position for position

mod aggregate;
mod order_by;
mod select;

pub use aggregate::{
    AggregateKind, AggregateOperation, AggregateState, PredicateAggregate, ProjectionAggregate,
    Recalculate,
};
pub use order_by::OrderByOperation;
pub use select::SelectOperation;

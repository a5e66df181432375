//! Ripple Reactive - Change notifications for Ripple live queries.
//!
//! This crate provides the publish/subscribe plumbing every operation node is
//! built on. Notification delivery is synchronous: when a source raises a
//! change, every listener (and every listener those listeners trigger) runs to
//! completion before the mutating call returns.
//!
//! # Core Concepts
//!
//! - `CollectionChange`: a contiguous insert, a contiguous removal, or a reset
//! - `ValueChange`: the old and new value of a scalar
//! - `Event`/`Subscription`: explicit listener edges with idempotent detach
//! - `Observable`/`ObservableSequence`: the surface every node exposes
//! - `ObservableVec`: the mutable raw sequence at the leaves of a graph
//!
//! # Example
//!
//! ```ignore
//! use ripple_reactive::{ObservableSequence, ObservableVec};
//!
//! let source = ObservableVec::from_values([1i64, 2, 3]);
//!
//! let sub = source.collection_changed().subscribe(|change| {
//!     println!("start: {:?}, items: {:?}", change.start(), change.items());
//!     Ok(())
//! });
//!
//! source.push(4i64.into())?;
//! drop(sub); // detaches the listener
//! ```

#![no_std]

extern crate alloc;

pub mod change_set;
pub mod observable;
pub mod subscription;

pub use change_set::{CollectionChange, ValueChange};
pub use observable::{Observable, ObservableSequence, ObservableVec};
pub use subscription::{Event, Listener, Subscription, SubscriptionId, SubscriptionManager};

// Re-export commonly used types from dependencies
pub use ripple_core::{Error, Result, Value};

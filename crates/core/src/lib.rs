//! Ripple Core - Core types for Ripple live queries.
//!
//! This crate provides the foundational types shared by the reactive and
//! incremental crates:
//!
//! - `Value`: dynamically typed items, keys and results
//! - `DataType`: the runtime type of a non-null value
//! - `Order`: ascending/descending sort direction
//! - `Error`: error types for graph construction and propagation
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{DataType, Error, Value};
//!
//! let v = Value::from(42i64);
//! assert_eq!(v.data_type(), Some(DataType::Int64));
//!
//! let err = Error::type_mismatch(DataType::Boolean, v.data_type());
//! assert!(!err.is_invalid_state());
//! ```

#![no_std]

extern crate alloc;

mod error;
mod order;
mod types;
mod value;

pub use error::{Error, Result};
pub use order::Order;
pub use types::DataType;
pub use value::Value;

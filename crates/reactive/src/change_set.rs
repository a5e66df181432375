//! Change payloads carried by notifications.
//!
//! A `CollectionChange` describes one structural mutation of a sequence
//! (a contiguous insert, a contiguous removal, or a full reset). A
//! `ValueChange` describes the replacement of a scalar value.

use alloc::vec::Vec;
use ripple_core::{Error, Result, Value};

/// A structural change to a sequence.
///
/// `Added` and `Removed` describe a contiguous run of items starting at
/// `start`, positioned against the sequence state immediately before the
/// change was applied. `Reset` carries no payload: listeners must re-read
/// the sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionChange {
    /// Items inserted at `start`
    Added { start: usize, items: Vec<Value> },
    /// Items removed from `start`
    Removed { start: usize, items: Vec<Value> },
    /// The whole sequence was replaced
    Reset,
}

impl CollectionChange {
    /// Creates an insertion change.
    #[inline]
    pub fn added(start: usize, items: Vec<Value>) -> Self {
        CollectionChange::Added { start, items }
    }

    /// Creates a removal change.
    #[inline]
    pub fn removed(start: usize, items: Vec<Value>) -> Self {
        CollectionChange::Removed { start, items }
    }

    /// Creates a reset change.
    #[inline]
    pub fn reset() -> Self {
        CollectionChange::Reset
    }

    /// Returns true if this is a reset.
    #[inline]
    pub fn is_reset(&self) -> bool {
        matches!(self, CollectionChange::Reset)
    }

    /// Returns the items carried by this change.
    pub fn items(&self) -> &[Value] {
        match self {
            CollectionChange::Added { items, .. } | CollectionChange::Removed { items, .. } => {
                items
            }
            CollectionChange::Reset => &[],
        }
    }

    /// Returns the starting index, or None for a reset.
    pub fn start(&self) -> Option<usize> {
        match self {
            CollectionChange::Added { start, .. } | CollectionChange::Removed { start, .. } => {
                Some(*start)
            }
            CollectionChange::Reset => None,
        }
    }

    /// Replays this change onto a mirror of the sequence.
    ///
    /// `live` is only consulted for a reset. Returns an inconsistency error if
    /// the change does not fit the mirror, which is how listeners detect an
    /// upstream that broke the notification contract.
    pub fn apply_to<F>(&self, mirror: &mut Vec<Value>, live: F) -> Result<()>
    where
        F: FnOnce() -> Vec<Value>,
    {
        match self {
            CollectionChange::Added { start, items } => {
                if *start > mirror.len() {
                    return Err(Error::inconsistent(
                        "collection_change",
                        alloc::format!("insert at {} past length {}", start, mirror.len()),
                    ));
                }
                mirror.splice(*start..*start, items.iter().cloned());
            }
            CollectionChange::Removed { start, items } => {
                let end = start + items.len();
                if end > mirror.len() || mirror[*start..end] != items[..] {
                    return Err(Error::inconsistent(
                        "collection_change",
                        alloc::format!("removed range {}..{} does not match", start, end),
                    ));
                }
                mirror.drain(*start..end);
            }
            CollectionChange::Reset => *mirror = live(),
        }
        Ok(())
    }
}

/// The replacement of a scalar value.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    /// Previously published value
    pub old: Value,
    /// Newly published value
    pub new: Value,
}

impl ValueChange {
    /// Creates a new value change.
    #[inline]
    pub fn new(old: Value, new: Value) -> Self {
        Self { old, new }
    }
}

//! Error types.
//!
//! Hand-rolled `Display`/`Error` impls rather than a `thiserror` derive — this crate has no other
//! use for that dependency, so a graph-invariant error like this one gets a plain manual impl
//! instead.

use std::fmt;

use crate::node::NodeHandle;

/// Errors returned by the keyed-list container and raised (as panics) by cycle detection.
///
/// `CycleDetected` is fatal to the read that triggered it: the core unwinds out of the offending
/// call rather than returning it as a `Result`. `DuplicateKey` and `KeyNotFound` are ordinary,
/// recoverable `Result` values — the keyed list is left unchanged.
#[derive(Debug)]
pub enum ReactiveError {
    /// Reading a node while it is still `RUNNING` — a read reached back into its own compute
    /// body, directly or through a cycle of derived nodes.
    CycleDetected { node: NodeHandle },
    /// A keyed-list insert used a key already present in the list.
    DuplicateKey,
    /// A keyed-list operation referenced a key that is not (or no longer) in the list.
    KeyNotFound,
}

impl fmt::Display for ReactiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactiveError::CycleDetected { .. } => {
                write!(f, "cyclic reactive dependency: node read from within its own compute body")
            }
            ReactiveError::DuplicateKey => write!(f, "keyed list already contains this key"),
            ReactiveError::KeyNotFound => write!(f, "keyed list has no node with this key"),
        }
    }
}

impl std::error::Error for ReactiveError {}

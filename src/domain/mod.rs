//! Pure domain types.
//!
//! Everything in this layer is a value with no I/O: policies, scope keys,
//! and the decision returned to callers.

pub mod decision;
pub mod key;
pub mod policy;

//! Core domain types for the flowline workflow editor.
//!
//! This crate provides the foundational strongly-typed identifiers shared
//! by the flowline crates. Node-level identifiers are allocated by the
//! graph engine itself and live in `flowline-graph`.

pub mod id;

pub use id::{ParseIdError, WorkflowId};

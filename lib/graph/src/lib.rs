//! Workflow graph model and structural-edit engine for flowline.
//!
//! This crate provides the in-memory representation of an automation
//! workflow and the operations that reshape it:
//!
//! - **Node Model**: trigger, action, and condition steps plus the
//!   bookkeeping kinds (placeholders, ghosts, the trunk end marker)
//! - **Repository**: a flat id-indexed arena holding the whole tree
//! - **Edit Operations**: insert, delete, move, duplicate, copy/cut/paste
//! - **Invariant Maintainer**: idempotent repair passes run after every
//!   structural mutation
//! - **Export Surface**: a renderer-ready node/edge view of the repository

pub mod catalog;
pub mod clipboard;
pub mod document;
pub mod editor;
pub mod error;
pub mod events;
pub mod export;
pub mod maintenance;
mod movement;
pub mod node;
pub mod repository;
mod splice;

pub use catalog::NodeTemplate;
pub use clipboard::ClipboardState;
pub use document::{Workflow, WorkflowMetadata};
pub use editor::GraphEditor;
pub use error::{EditError, IntegrityError};
pub use events::EditorEvent;
pub use export::{ExportEdge, ExportLinks, ExportNode, ExportView};
pub use node::{BranchRef, BranchSide, Branches, IdAllocator, Node, NodeId, NodeKind, Payload};
pub use repository::Repository;

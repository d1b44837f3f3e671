//! Error types for the graph crate.
//!
//! Edit operations return [`EditError`] as an explicit result so the UI
//! layer can surface a message; no partial mutation is ever committed on
//! error. [`IntegrityError`] backs [`Repository::validate`] and describes a
//! violated structural invariant.
//!
//! [`Repository::validate`]: crate::repository::Repository::validate

use crate::node::{BranchSide, NodeId, NodeKind};
use std::fmt;

/// Errors from structural edit operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// A referenced node does not exist, or the stated before-node is not
    /// actually a child of the stated parent.
    ReferenceNotFound { id: NodeId },
    /// The operation would place a node somewhere its kind or capability
    /// flags forbid.
    InvalidPlacement { kind: NodeKind, detail: String },
    /// Paste was attempted with nothing copied or cut.
    EmptyClipboard,
    /// Clipboard data references a node ID absent from the collected set.
    MalformedSubtree { missing: NodeId },
}

impl EditError {
    pub(crate) fn invalid_placement(kind: NodeKind, detail: impl Into<String>) -> Self {
        Self::InvalidPlacement {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceNotFound { id } => {
                write!(f, "node not found: {id}")
            }
            Self::InvalidPlacement { kind, detail } => {
                write!(f, "invalid placement for {kind} node: {detail}")
            }
            Self::EmptyClipboard => write!(f, "clipboard is empty"),
            Self::MalformedSubtree { missing } => {
                write!(f, "clipboard subtree references missing node: {missing}")
            }
        }
    }
}

impl std::error::Error for EditError {}

/// A violated structural invariant, reported by repository validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// No trigger node exists.
    MissingTrigger,
    /// More than one trigger node exists.
    MultipleTriggers,
    /// A `children`/`branches` list references an ID absent from the arena.
    DanglingReference { from: NodeId, to: NodeId },
    /// A node's `parent` back-pointer disagrees with the list containing it.
    ParentMismatch { node: NodeId, listed_under: NodeId },
    /// A chain node carries more than one child.
    TooManyChildren { node: NodeId },
    /// A condition branch is structurally empty.
    EmptyBranch { condition: NodeId, side: BranchSide },
    /// A condition carries chain children, or a chain node carries branches.
    MixedLinkage { node: NodeId },
    /// A non-trigger, non-sticky node is referenced by no list at all.
    Orphaned { node: NodeId },
    /// A bookkeeping node sits somewhere bookkeeping nodes may not be
    /// (e.g. a placeholder sharing a branch with real steps).
    StrayBookkeeping { node: NodeId },
    /// The trunk does not terminate in exactly one end marker.
    BrokenTrunk { detail: String },
    /// The link structure contains a cycle.
    CycleDetected,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrigger => write!(f, "no trigger node exists"),
            Self::MultipleTriggers => write!(f, "more than one trigger node exists"),
            Self::DanglingReference { from, to } => {
                write!(f, "node {from} references missing node {to}")
            }
            Self::ParentMismatch { node, listed_under } => {
                write!(
                    f,
                    "node {node} is listed under {listed_under} but its parent disagrees"
                )
            }
            Self::TooManyChildren { node } => {
                write!(f, "chain node {node} has more than one child")
            }
            Self::EmptyBranch { condition, side } => {
                write!(f, "condition {condition} has an empty {side} branch")
            }
            Self::MixedLinkage { node } => {
                write!(f, "node {node} mixes chain and branch linkage")
            }
            Self::Orphaned { node } => {
                write!(f, "node {node} is referenced by no parent list")
            }
            Self::StrayBookkeeping { node } => {
                write!(f, "bookkeeping node {node} is out of place")
            }
            Self::BrokenTrunk { detail } => write!(f, "broken trunk: {detail}"),
            Self::CycleDetected => write!(f, "link structure contains a cycle"),
        }
    }
}

impl std::error::Error for IntegrityError {}

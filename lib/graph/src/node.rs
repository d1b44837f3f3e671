//! Workflow node types and the node identifier allocator.
//!
//! Nodes are the unit of the workflow graph. Each node has:
//! - A unique, immutable ID allocated by [`IdAllocator`]
//! - A kind (step kinds plus the engine-managed bookkeeping kinds)
//! - An opaque configuration payload owned by external config forms
//! - Link fields (`parent`, `children`, `branches`) stored as plain IDs

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// A unique identifier for a node within a workflow.
///
/// Node IDs are allocated as `<kind prefix>-<sequence>` (e.g. `action-3`)
/// by the per-document [`IdAllocator`] and are never reused, even after the
/// node is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Builds an ID from a kind prefix and an allocator sequence number.
    #[must_use]
    pub(crate) fn from_parts(kind: NodeKind, seq: u64) -> Self {
        Self(format!("{}-{}", kind.prefix(), seq))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the ID into its kind prefix and sequence number, when it has
    /// the allocator's `<prefix>-<sequence>` shape.
    #[must_use]
    pub(crate) fn parts(&self) -> Option<(&str, u64)> {
        let (prefix, seq) = self.0.rsplit_once('-')?;
        Some((prefix, seq.parse().ok()?))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The single entry point of the workflow; root of the trunk.
    Trigger,
    /// A configurable step on the trunk or inside a branch.
    Action,
    /// A forking step with `yes`/`no` branches and no direct successor.
    Condition,
    /// Bookkeeping marker for an empty branch ("nothing here yet").
    Placeholder,
    /// Invisible bookkeeping marker for an action's unauthored continuation.
    Ghost,
    /// The trunk's terminal marker.
    End,
    /// A free-floating annotation outside the trunk/branch structure.
    StickyNote,
}

impl NodeKind {
    /// Returns the prefix used when allocating IDs of this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Placeholder => "placeholder",
            Self::Ghost => "ghost",
            Self::End => "end",
            Self::StickyNote => "note",
        }
    }

    /// Returns true for user-authored step kinds (actions and conditions).
    #[must_use]
    pub const fn is_step(self) -> bool {
        matches!(self, Self::Action | Self::Condition)
    }

    /// Returns true for engine-managed bookkeeping and boundary kinds.
    #[must_use]
    pub const fn is_engine_managed(self) -> bool {
        matches!(
            self,
            Self::Trigger | Self::Placeholder | Self::Ghost | Self::End
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One of a condition's two outgoing branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSide {
    Yes,
    No,
}

impl BranchSide {
    /// Returns the branch name as used in export records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    /// Both sides, in display order.
    pub const BOTH: [Self; 2] = [Self::Yes, Self::No];
}

impl fmt::Display for BranchSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branch-membership metadata carried by every node that sits in a
/// condition's branch list (and by ghosts hanging off such nodes).
///
/// Membership is always decided from this field, never inferred from the
/// parent node's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// The condition that owns the branch.
    pub condition: NodeId,
    /// Which of the condition's branches the node belongs to.
    pub side: BranchSide,
}

impl BranchRef {
    /// Creates a new branch reference.
    #[must_use]
    pub fn new(condition: NodeId, side: BranchSide) -> Self {
        Self { condition, side }
    }
}

/// The two ordered branch lists of a condition node.
///
/// Each list holds the branch's top-level chain in order: the real
/// `Action`/`Condition` steps, or exactly one `Placeholder` when the branch
/// is empty. Ghost terminators are not list members; they hang off the tail
/// action's `children`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branches {
    pub yes: Vec<NodeId>,
    pub no: Vec<NodeId>,
}

impl Branches {
    /// Returns the list for one side.
    #[must_use]
    pub fn list(&self, side: BranchSide) -> &[NodeId] {
        match side {
            BranchSide::Yes => &self.yes,
            BranchSide::No => &self.no,
        }
    }

    /// Returns the mutable list for one side.
    pub fn list_mut(&mut self, side: BranchSide) -> &mut Vec<NodeId> {
        match side {
            BranchSide::Yes => &mut self.yes,
            BranchSide::No => &mut self.no,
        }
    }

    /// Returns the side whose list contains the given node, if any.
    #[must_use]
    pub fn side_of(&self, id: &NodeId) -> Option<BranchSide> {
        BranchSide::BOTH
            .into_iter()
            .find(|side| self.list(*side).contains(id))
    }
}

/// The opaque configuration payload attached to each node.
///
/// External config forms own the contents; the engine reads only
/// `is_configured` and the `is_terminal` capability flag used by placement
/// validation. Everything else round-trips through the flattened `data` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Display label for the step.
    #[serde(default)]
    pub label: String,
    /// Icon reference for the step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Whether the user has completed this step's config form.
    #[serde(default)]
    pub is_configured: bool,
    /// Whether this step may only sit immediately before the trunk end
    /// (e.g. a "stop workflow" action).
    #[serde(default)]
    pub is_terminal: bool,
    /// Arbitrary form-owned key/value data, carried opaquely.
    #[serde(flatten)]
    pub data: serde_json::Map<String, JsonValue>,
}

impl Payload {
    /// Creates a payload with the given label.
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Marks the payload as terminal-only.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    /// Sets an opaque data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Clears the configured flag, as done when cloning a step.
    pub fn reset_configuration(&mut self) {
        self.is_configured = false;
    }
}

/// A workflow node.
///
/// The repository owns all nodes; `parent` is a lookup relation used to
/// validate and reconnect during edits, not an ownership link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, immutable after creation.
    pub id: NodeId,
    /// The node kind.
    pub kind: NodeKind,
    /// Opaque configuration payload.
    pub payload: Payload,
    /// The owning node, or none for the trigger and sticky notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    /// Single-successor chain link; at most one element, unused by
    /// conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeId>,
    /// The `yes`/`no` branch lists; present only on conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Branches>,
    /// Branch-membership metadata; none for trunk nodes and sticky notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchRef>,
}

impl Node {
    /// Creates a chain node (any non-condition kind) with no links yet.
    #[must_use]
    pub fn chain(id: NodeId, kind: NodeKind, payload: Payload) -> Self {
        debug_assert!(kind != NodeKind::Condition);
        Self {
            id,
            kind,
            payload,
            parent: None,
            children: Vec::new(),
            branches: None,
            branch: None,
        }
    }

    /// Creates a condition node with empty branch lists.
    #[must_use]
    pub fn condition(id: NodeId, payload: Payload) -> Self {
        Self {
            id,
            kind: NodeKind::Condition,
            payload,
            parent: None,
            children: Vec::new(),
            branches: Some(Branches::default()),
            branch: None,
        }
    }

    /// Returns the node's single successor, if any.
    #[must_use]
    pub fn first_child(&self) -> Option<&NodeId> {
        self.children.first()
    }

    /// Returns true for user-authored step kinds.
    #[must_use]
    pub fn is_step(&self) -> bool {
        self.kind.is_step()
    }

    /// Returns true if this node sits on the trunk (reachable from the
    /// trigger without entering a branch).
    #[must_use]
    pub fn is_on_trunk(&self) -> bool {
        self.branch.is_none() && self.kind != NodeKind::StickyNote
    }

    /// Replaces the node's successor link.
    pub(crate) fn set_child(&mut self, child: Option<NodeId>) {
        self.children.clear();
        if let Some(child) = child {
            self.children.push(child);
        }
    }
}

/// Produces collision-free node identifiers.
///
/// One allocator exists per workflow document. Counters only ever advance,
/// so deleted IDs are never reissued (cloning always draws fresh IDs).
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: HashMap<&'static str, u64>,
}

impl IdAllocator {
    /// Creates an allocator with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an allocator from an existing set of node IDs, so that a
    /// deserialized workflow never reissues an ID already in use.
    #[must_use]
    pub fn from_existing<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let mut alloc = Self::new();
        for id in ids {
            let Some((prefix, seq)) = id.parts() else {
                continue;
            };
            for kind in [
                NodeKind::Trigger,
                NodeKind::Action,
                NodeKind::Condition,
                NodeKind::Placeholder,
                NodeKind::Ghost,
                NodeKind::End,
                NodeKind::StickyNote,
            ] {
                if kind.prefix() == prefix {
                    let counter = alloc.counters.entry(kind.prefix()).or_insert(0);
                    *counter = (*counter).max(seq);
                }
            }
        }
        alloc
    }

    /// Allocates a fresh ID for the given kind.
    pub fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let counter = self.counters.entry(kind.prefix()).or_insert(0);
        *counter += 1;
        NodeId::from_parts(kind, *counter)
    }
}

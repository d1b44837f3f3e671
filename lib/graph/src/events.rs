//! Side-channel notifications produced by the edit operations.
//!
//! The engine never owns selection state or rendering; it signals the
//! collaborators that do. Events are queued on the editor and drained by
//! the embedding UI after each operation.

use crate::clipboard::ClipboardState;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// A notification emitted by a completed edit operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorEvent {
    /// The repository changed shape; the export adapter should re-derive
    /// its render list.
    GraphChanged,
    /// These nodes no longer exist. The collaborator owning selection must
    /// clear any selection that references one of them.
    NodesRemoved { ids: Vec<NodeId> },
    /// The clipboard changed; paste affordances should be refreshed.
    ClipboardChanged { state: ClipboardState },
}

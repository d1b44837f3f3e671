//! Renderer-ready view of the repository.
//!
//! The export adapter consumes the repository read-only and derives a flat
//! node/edge list for the diagram layer. Layout coordinates are entirely
//! the adapter's concern; this module never assigns or depends on position.
//!
//! Ghost nodes are invisible bookkeeping and are omitted; placeholders and
//! sticky notes are included. Output ordering is deterministic (sorted by
//! node ID) so repeated derivations of the same repository are identical.

use crate::node::{BranchSide, NodeId, NodeKind, Payload};
use crate::repository::Repository;
use serde::{Deserialize, Serialize};

/// Outgoing links of an exported node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportLinks {
    /// Chain nodes: zero or one successor.
    Chain { children: Vec<NodeId> },
    /// Conditions: the two branch lists.
    Branches { yes: Vec<NodeId>, no: Vec<NodeId> },
}

/// One node record in the export view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(flatten)]
    pub links: ExportLinks,
}

/// One parent-to-child relation in the export view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEdge {
    /// Stable edge identifier derived from its endpoints.
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    /// Set on a condition-to-branch-head edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchSide>,
}

impl ExportEdge {
    fn new(source: NodeId, target: NodeId, branch: Option<BranchSide>) -> Self {
        Self {
            id: format!("e-{source}-{target}"),
            source,
            target,
            branch,
        }
    }
}

/// The complete renderer-ready view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportView {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

/// Derives the export view from a repository.
#[must_use]
pub fn render(repo: &Repository) -> ExportView {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    for id in repo.sorted_ids() {
        let Some(node) = repo.node(&id) else { continue };
        if node.kind == NodeKind::Ghost {
            continue;
        }

        let links = match &node.branches {
            Some(branches) => ExportLinks::Branches {
                yes: branches.yes.clone(),
                no: branches.no.clone(),
            },
            None => ExportLinks::Chain {
                children: node
                    .children
                    .iter()
                    .filter(|child| {
                        repo.node(child)
                            .is_some_and(|child| child.kind != NodeKind::Ghost)
                    })
                    .cloned()
                    .collect(),
            },
        };

        match &links {
            ExportLinks::Chain { children } => {
                for child in children {
                    edges.push(ExportEdge::new(node.id.clone(), child.clone(), None));
                }
            }
            ExportLinks::Branches { yes, no } => {
                // One labelled edge to each branch head; the rest of the
                // branch chains link through their own child edges.
                if let Some(head) = yes.first() {
                    edges.push(ExportEdge::new(
                        node.id.clone(),
                        head.clone(),
                        Some(BranchSide::Yes),
                    ));
                }
                if let Some(head) = no.first() {
                    edges.push(ExportEdge::new(
                        node.id.clone(),
                        head.clone(),
                        Some(BranchSide::No),
                    ));
                }
            }
        }

        nodes.push(ExportNode {
            id: node.id.clone(),
            kind: node.kind,
            payload: node.payload.clone(),
            parent_id: node.parent.clone(),
            links,
        });
    }

    ExportView { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{IdAllocator, Payload};

    #[test]
    fn seeded_repository_exports_one_edge() {
        let mut ids = IdAllocator::new();
        let repo = Repository::seeded(&mut ids, Payload::labeled("Trigger"));

        let view = render(&repo);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.edges.len(), 1);

        let edge = &view.edges[0];
        assert_eq!(edge.source.as_str(), "trigger-1");
        assert_eq!(edge.target.as_str(), "end-1");
        assert_eq!(edge.branch, None);
        assert_eq!(edge.id, "e-trigger-1-end-1");
    }

    #[test]
    fn render_is_deterministic() {
        let mut ids = IdAllocator::new();
        let repo = Repository::seeded(&mut ids, Payload::labeled("Trigger"));
        assert_eq!(render(&repo), render(&repo));
    }

    #[test]
    fn ghosts_are_omitted_and_branch_edges_are_labelled() {
        let mut editor = crate::GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let condition = editor
            .insert(NodeKind::Condition, &trigger, &end, Payload::labeled("Gate"))
            .unwrap();
        let action = editor
            .add_node_to_branch(
                &condition,
                BranchSide::Yes,
                NodeKind::Action,
                Payload::labeled("Notify"),
            )
            .unwrap();
        let ghost = editor.repository().ghost_child(&action).unwrap();

        let view = render(editor.repository());

        assert!(view.nodes.iter().all(|node| node.id != ghost));
        assert!(view.edges.iter().all(|edge| edge.target != ghost));
        // The action's only child is the ghost, so it has no outgoing edge.
        assert!(view.edges.iter().all(|edge| edge.source != action));

        let yes_edge = view
            .edges
            .iter()
            .find(|edge| edge.branch == Some(BranchSide::Yes))
            .expect("yes edge present");
        assert_eq!(yes_edge.source, condition);
        assert_eq!(yes_edge.target, action);

        let no_edge = view
            .edges
            .iter()
            .find(|edge| edge.branch == Some(BranchSide::No))
            .expect("no edge present");
        assert_eq!(no_edge.source, condition);
        assert_eq!(
            view.nodes
                .iter()
                .find(|node| node.id == no_edge.target)
                .map(|node| node.kind),
            Some(NodeKind::Placeholder)
        );
    }
}

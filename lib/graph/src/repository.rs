//! The node repository: a flat, id-indexed arena holding the whole tree.
//!
//! The repository is the single source of truth every other component reads
//! and mutates. Link fields (`parent`, `children`, `branches`) are plain ID
//! values resolved through the arena, never live references, so stale or
//! cyclic links are detectable and repairable rather than fatal.
//!
//! `validate()` checks the structural invariants directly and lowers the
//! link structure into a petgraph `DiGraph` for cycle detection. It is used
//! by tests and debug assertions; the invariant maintainer keeps live
//! repositories valid without it.

use crate::error::{EditError, IntegrityError};
use crate::node::{BranchRef, BranchSide, IdAllocator, Node, NodeId, NodeKind, Payload};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A flat keyed collection of nodes representing a whole workflow tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Repository {
    nodes: HashMap<NodeId, Node>,
}

impl Repository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository seeded with a trigger chained to an end marker.
    #[must_use]
    pub fn seeded(ids: &mut IdAllocator, trigger_payload: Payload) -> Self {
        let mut repo = Self::new();

        let trigger_id = ids.allocate(NodeKind::Trigger);
        let end_id = ids.allocate(NodeKind::End);

        let mut trigger = Node::chain(trigger_id.clone(), NodeKind::Trigger, trigger_payload);
        trigger.set_child(Some(end_id.clone()));
        let mut end = Node::chain(end_id, NodeKind::End, Payload::default());
        end.parent = Some(trigger_id);

        repo.insert_node(trigger);
        repo.insert_node(end);
        repo
    }

    /// Wraps an externally supplied node map (e.g. from the persistence
    /// collaborator). The caller is responsible for running the invariant
    /// maintainer afterwards.
    #[must_use]
    pub fn from_nodes(nodes: HashMap<NodeId, Node>) -> Self {
        Self { nodes }
    }

    /// Consumes the repository, returning the full node map.
    #[must_use]
    pub fn into_nodes(self) -> HashMap<NodeId, Node> {
        self.nodes
    }

    /// Returns the number of nodes in the repository.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the repository holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if a node with the given ID exists.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns an iterator over all nodes, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns all node IDs in sorted order.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn require(&self, id: &NodeId) -> Result<&Node, EditError> {
        self.nodes.get(id).ok_or_else(|| EditError::ReferenceNotFound {
            id: id.clone(),
        })
    }

    pub(crate) fn require_mut(&mut self, id: &NodeId) -> Result<&mut Node, EditError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| EditError::ReferenceNotFound { id: id.clone() })
    }

    pub(crate) fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub(crate) fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        self.nodes.remove(id)
    }

    /// Returns the trigger node, if the repository has one.
    #[must_use]
    pub fn trigger(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|node| node.kind == NodeKind::Trigger)
    }

    /// Returns the trunk: the chain of node IDs reachable from the trigger
    /// without following a condition's branches, in order.
    ///
    /// The walk is cycle-guarded so it terminates even on a repository the
    /// maintainer has not yet repaired.
    #[must_use]
    pub fn trunk(&self) -> Vec<NodeId> {
        let mut trunk = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.trigger().map(|node| node.id.clone());

        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(node) = self.node(&id) else { break };
            current = node.first_child().cloned();
            trunk.push(id);
        }
        trunk
    }

    /// Returns the trunk's end marker, if one exists.
    #[must_use]
    pub fn trunk_end(&self) -> Option<NodeId> {
        let trunk = self.trunk();
        let last = trunk.last()?;
        (self.node(last)?.kind == NodeKind::End).then(|| last.clone())
    }

    /// Returns `start` plus every following step (action/condition) reached
    /// through `children`, stopping before any marker. A condition ends the
    /// chain (it has no successor).
    pub(crate) fn step_chain(&self, start: &NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start.clone());

        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(node) = self.node(&id) else { break };
            if !node.is_step() {
                break;
            }
            current = node.first_child().cloned();
            chain.push(id);
        }
        chain
    }

    /// Returns the ghost terminator hanging off a node, if any.
    pub(crate) fn ghost_child(&self, id: &NodeId) -> Option<NodeId> {
        let child = self.node(id)?.first_child()?;
        (self.node(child)?.kind == NodeKind::Ghost).then(|| child.clone())
    }

    /// Collects a node and every descendant reachable through `children`
    /// and both branch lists, in pre-order. The trunk end marker is never
    /// entered: it belongs to the trunk, not to any subtree.
    #[must_use]
    pub fn collect_subtree(&self, root: &NodeId) -> Vec<NodeId> {
        let mut collected = Vec::new();
        let mut seen = HashSet::new();
        self.collect_into(root, &mut collected, &mut seen);
        collected
    }

    fn collect_into(&self, id: &NodeId, out: &mut Vec<NodeId>, seen: &mut HashSet<NodeId>) {
        let Some(node) = self.node(id) else { return };
        if node.kind == NodeKind::End || !seen.insert(id.clone()) {
            return;
        }
        out.push(id.clone());

        for child in &node.children {
            self.collect_into(child, out, seen);
        }
        if let Some(branches) = &node.branches {
            for side in BranchSide::BOTH {
                // List members chain into each other; walking the heads
                // alone would suffice, but walking every member keeps the
                // collection total over un-repaired lists.
                for member in branches.list(side) {
                    self.collect_into(member, out, seen);
                }
            }
        }
    }

    /// Returns true if `candidate` lies within the subtree rooted at `root`.
    pub(crate) fn is_within(&self, root: &NodeId, candidate: &NodeId) -> bool {
        self.collect_subtree(root).contains(candidate)
    }

    /// Returns the branch list addressed by a branch reference, or an empty
    /// slice when the reference is stale.
    pub(crate) fn branch_list(&self, branch: &BranchRef) -> &[NodeId] {
        self.node(&branch.condition)
            .and_then(|node| node.branches.as_ref())
            .map(|branches| branches.list(branch.side))
            .unwrap_or(&[])
    }

    pub(crate) fn branch_list_mut(&mut self, branch: &BranchRef) -> Option<&mut Vec<NodeId>> {
        self.node_mut(&branch.condition)?
            .branches
            .as_mut()
            .map(|branches| branches.list_mut(branch.side))
    }

    /// Verifies that `before` currently hangs off `parent`: its back-pointer
    /// names `parent`, and `parent`'s own lists contain it.
    pub(crate) fn require_child_of(
        &self,
        parent_id: &NodeId,
        before_id: &NodeId,
    ) -> Result<(), EditError> {
        let parent = self.require(parent_id)?;
        let before = self.require(before_id)?;

        let listed = parent.children.contains(before_id)
            || parent
                .branches
                .as_ref()
                .is_some_and(|branches| branches.side_of(before_id).is_some());

        if before.parent.as_ref() == Some(parent_id) && listed {
            Ok(())
        } else {
            Err(EditError::ReferenceNotFound {
                id: before_id.clone(),
            })
        }
    }

    /// Checks the structural invariants, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityError`] describing the violated invariant.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        self.validate_triggers()?;
        self.validate_cycles()?;
        self.validate_links()?;
        self.validate_branches()?;
        self.validate_markers()?;
        self.validate_trunk()?;
        Ok(())
    }

    fn validate_triggers(&self) -> Result<(), IntegrityError> {
        let mut triggers = self
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::Trigger);
        let first = triggers.next().ok_or(IntegrityError::MissingTrigger)?;
        if triggers.next().is_some() {
            return Err(IntegrityError::MultipleTriggers);
        }
        if let Some(parent) = &first.parent {
            return Err(IntegrityError::ParentMismatch {
                node: first.id.clone(),
                listed_under: parent.clone(),
            });
        }
        Ok(())
    }

    fn validate_links(&self) -> Result<(), IntegrityError> {
        for node in self.nodes.values() {
            match node.kind {
                NodeKind::Condition => {
                    if node.branches.is_none() || !node.children.is_empty() {
                        return Err(IntegrityError::MixedLinkage {
                            node: node.id.clone(),
                        });
                    }
                }
                _ => {
                    if node.branches.is_some() {
                        return Err(IntegrityError::MixedLinkage {
                            node: node.id.clone(),
                        });
                    }
                    if node.children.len() > 1 {
                        return Err(IntegrityError::TooManyChildren {
                            node: node.id.clone(),
                        });
                    }
                }
            }

            for child_id in &node.children {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    IntegrityError::DanglingReference {
                        from: node.id.clone(),
                        to: child_id.clone(),
                    }
                })?;
                if child.parent.as_ref() != Some(&node.id) {
                    return Err(IntegrityError::ParentMismatch {
                        node: child_id.clone(),
                        listed_under: node.id.clone(),
                    });
                }
            }

            // Nothing may be referenced twice by the same parent.
            let mut counts: HashMap<&NodeId, usize> = HashMap::new();
            for referenced in node.children.iter().chain(
                node.branches
                    .iter()
                    .flat_map(|branches| branches.yes.iter().chain(branches.no.iter())),
            ) {
                *counts.entry(referenced).or_insert(0) += 1;
            }
            if let Some((duplicated, _)) = counts.iter().find(|(_, count)| **count > 1) {
                return Err(IntegrityError::StrayBookkeeping {
                    node: (*duplicated).clone(),
                });
            }
        }

        // Every non-trigger, non-sticky node must be referenced somewhere.
        let referenced: HashSet<&NodeId> = self
            .nodes
            .values()
            .flat_map(|node| {
                node.children.iter().chain(
                    node.branches
                        .iter()
                        .flat_map(|branches| branches.yes.iter().chain(branches.no.iter())),
                )
            })
            .collect();
        for node in self.nodes.values() {
            if matches!(node.kind, NodeKind::Trigger | NodeKind::StickyNote) {
                continue;
            }
            if !referenced.contains(&node.id) {
                return Err(IntegrityError::Orphaned {
                    node: node.id.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_branches(&self) -> Result<(), IntegrityError> {
        for node in self.nodes.values() {
            let Some(branches) = &node.branches else {
                continue;
            };
            for side in BranchSide::BOTH {
                let list = branches.list(side);
                if list.is_empty() {
                    return Err(IntegrityError::EmptyBranch {
                        condition: node.id.clone(),
                        side,
                    });
                }

                let mut expected_parent = node.id.clone();
                for (index, member_id) in list.iter().enumerate() {
                    let member = self.nodes.get(member_id).ok_or_else(|| {
                        IntegrityError::DanglingReference {
                            from: node.id.clone(),
                            to: member_id.clone(),
                        }
                    })?;

                    match member.kind {
                        NodeKind::Placeholder => {
                            // A placeholder stands alone in its branch.
                            if list.len() != 1 {
                                return Err(IntegrityError::StrayBookkeeping {
                                    node: member_id.clone(),
                                });
                            }
                        }
                        NodeKind::Action | NodeKind::Condition => {}
                        _ => {
                            return Err(IntegrityError::StrayBookkeeping {
                                node: member_id.clone(),
                            });
                        }
                    }

                    if member.parent.as_ref() != Some(&expected_parent) {
                        return Err(IntegrityError::ParentMismatch {
                            node: member_id.clone(),
                            listed_under: node.id.clone(),
                        });
                    }
                    let expected_ref = BranchRef::new(node.id.clone(), side);
                    if member.branch.as_ref() != Some(&expected_ref) {
                        return Err(IntegrityError::ParentMismatch {
                            node: member_id.clone(),
                            listed_under: node.id.clone(),
                        });
                    }
                    // A condition forks; only the last list slot may hold one.
                    if member.kind == NodeKind::Condition && index + 1 != list.len() {
                        return Err(IntegrityError::TooManyChildren {
                            node: member_id.clone(),
                        });
                    }
                    expected_parent = member_id.clone();
                }
            }
        }
        Ok(())
    }

    fn validate_markers(&self) -> Result<(), IntegrityError> {
        for node in self.nodes.values() {
            match node.kind {
                NodeKind::Ghost => {
                    let parent_id = node.parent.as_ref().ok_or_else(|| {
                        IntegrityError::Orphaned {
                            node: node.id.clone(),
                        }
                    })?;
                    let parent = self.nodes.get(parent_id).ok_or_else(|| {
                        IntegrityError::DanglingReference {
                            from: node.id.clone(),
                            to: parent_id.clone(),
                        }
                    })?;
                    let sole_child =
                        parent.children.len() == 1 && parent.children[0] == node.id;
                    if parent.kind != NodeKind::Action || !sole_child || node.branch.is_none() {
                        return Err(IntegrityError::StrayBookkeeping {
                            node: node.id.clone(),
                        });
                    }
                    if !node.children.is_empty() {
                        return Err(IntegrityError::TooManyChildren {
                            node: node.id.clone(),
                        });
                    }
                }
                NodeKind::StickyNote => {
                    if node.parent.is_some() || !node.children.is_empty() {
                        return Err(IntegrityError::StrayBookkeeping {
                            node: node.id.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_cycles(&self) -> Result<(), IntegrityError> {
        let mut graph: DiGraph<&NodeId, ()> = DiGraph::new();
        let mut indices = HashMap::new();

        for id in self.nodes.keys() {
            indices.insert(id, graph.add_node(id));
        }
        for node in self.nodes.values() {
            let source = indices[&node.id];
            for child in &node.children {
                if let Some(&target) = indices.get(child) {
                    graph.add_edge(source, target, ());
                }
            }
            if let Some(branches) = &node.branches {
                for member in branches.yes.iter().chain(branches.no.iter()) {
                    if let Some(&target) = indices.get(member) {
                        graph.add_edge(source, target, ());
                    }
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(IntegrityError::CycleDetected);
        }
        Ok(())
    }

    fn validate_trunk(&self) -> Result<(), IntegrityError> {
        let trunk = self.trunk();
        let last = trunk.last().ok_or(IntegrityError::MissingTrigger)?;
        let last_kind = self.nodes[last].kind;

        let end_count = self
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::End)
            .count();

        match last_kind {
            NodeKind::End if end_count == 1 => Ok(()),
            NodeKind::Condition if end_count == 0 => Ok(()),
            NodeKind::End => Err(IntegrityError::BrokenTrunk {
                detail: format!("{end_count} end markers exist"),
            }),
            NodeKind::Condition => Err(IntegrityError::BrokenTrunk {
                detail: "end marker exists behind a forking trunk tail".to_string(),
            }),
            other => Err(IntegrityError::BrokenTrunk {
                detail: format!("trunk terminates in a {other} node"),
            }),
        }
    }
}

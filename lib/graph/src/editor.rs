//! The structural-edit handle over a workflow repository.
//!
//! [`GraphEditor`] owns the repository, the identifier allocator, the
//! clipboard, and the pending-event queue. It is an explicit handle passed
//! to callers (never a module-level singleton), so multiple independent
//! workflow documents can coexist and tests stay deterministic.
//!
//! Every mutating operation follows the same discipline: validate against
//! the live repository, stage the mutation on a clone, run the invariant
//! maintainer, then swap the staged arena in. An operation that fails
//! leaves the repository bit-identical to before the call.

use crate::clipboard::Clipboard;
use crate::error::EditError;
use crate::events::EditorEvent;
use crate::maintenance;
use crate::node::{BranchRef, BranchSide, IdAllocator, Node, NodeId, NodeKind, Payload};
use crate::repository::Repository;
use crate::splice;
use std::collections::HashMap;
use std::slice;
use tracing::debug;

/// The edit-operation handle for one workflow document.
#[derive(Debug, Clone)]
pub struct GraphEditor {
    pub(crate) repo: Repository,
    pub(crate) ids: IdAllocator,
    pub(crate) clipboard: Clipboard,
    pub(crate) events: Vec<EditorEvent>,
}

impl Default for GraphEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEditor {
    /// Creates an editor over a freshly seeded repository (trigger + end).
    #[must_use]
    pub fn new() -> Self {
        Self::with_trigger(Payload::default())
    }

    /// Creates an editor whose seeded trigger carries the given payload.
    #[must_use]
    pub fn with_trigger(trigger_payload: Payload) -> Self {
        let mut ids = IdAllocator::new();
        let repo = Repository::seeded(&mut ids, trigger_payload);
        Self {
            repo,
            ids,
            clipboard: Clipboard::default(),
            events: Vec::new(),
        }
    }

    /// Creates an editor over a full node map returned by the persistence
    /// collaborator. The allocator is rebuilt from the map (ids are never
    /// reissued) and the invariant maintainer runs once on load.
    #[must_use]
    pub fn from_nodes(nodes: HashMap<NodeId, Node>) -> Self {
        let mut ids = IdAllocator::from_existing(nodes.keys());
        let mut repo = Repository::from_nodes(nodes);
        maintenance::run(&mut repo, &mut ids);
        Self {
            repo,
            ids,
            clipboard: Clipboard::default(),
            events: Vec::new(),
        }
    }

    /// Returns the repository for read-only consumption.
    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Consumes the editor, returning the full node map for persistence.
    #[must_use]
    pub fn into_nodes(self) -> HashMap<NodeId, Node> {
        self.repo.into_nodes()
    }

    /// Drains the queued side-channel events.
    pub fn drain_events(&mut self) -> Vec<EditorEvent> {
        std::mem::take(&mut self.events)
    }

    /// Inserts a new step in front of `before`, which must currently hang
    /// off `parent`.
    ///
    /// A non-condition takes over `before` as its single child. A condition
    /// forks: the entire former downstream chain starting at `before` moves
    /// into its `yes` branch, while `no` receives a fresh placeholder. A
    /// `before` that names the trunk end or a branch ghost is a marker: it
    /// is replaced rather than displaced, and a fork inserted there starts
    /// with two empty branches.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` when `parent`/`before` do not exist or are not
    /// related as stated; `InvalidPlacement` for non-step kinds or a
    /// terminal-only payload anywhere but immediately before the trunk end.
    pub fn insert(
        &mut self,
        kind: NodeKind,
        parent_id: &NodeId,
        before_id: &NodeId,
        payload: Payload,
    ) -> Result<NodeId, EditError> {
        if !kind.is_step() {
            return Err(EditError::invalid_placement(
                kind,
                "only actions and conditions can be inserted",
            ));
        }
        self.repo.require_child_of(parent_id, before_id)?;
        if payload.is_terminal && self.repo.require(before_id)?.kind != NodeKind::End {
            return Err(EditError::invalid_placement(
                kind,
                "terminal steps may only sit immediately before the end marker",
            ));
        }

        let mut staged = self.repo.clone();
        let id = self.ids.allocate(kind);
        let node = if kind == NodeKind::Condition {
            Node::condition(id.clone(), payload)
        } else {
            Node::chain(id.clone(), kind, payload)
        };
        staged.insert_node(node);
        splice::attach_chain_before(
            &mut staged,
            &mut self.ids,
            slice::from_ref(&id),
            parent_id,
            before_id,
        )?;
        maintenance::run(&mut staged, &mut self.ids);

        debug!(node = %id, %kind, parent = %parent_id, before = %before_id, "inserted node");
        self.commit(staged);
        Ok(id)
    }

    /// Inserts a step seeded from a catalog template.
    ///
    /// # Errors
    ///
    /// As [`GraphEditor::insert`].
    pub fn insert_from_template(
        &mut self,
        template: &crate::catalog::NodeTemplate,
        parent_id: &NodeId,
        before_id: &NodeId,
    ) -> Result<NodeId, EditError> {
        self.insert(template.kind, parent_id, before_id, template.seed_payload())
    }

    /// Materializes a step inside a condition branch: replacing the
    /// placeholder of an empty branch, or extending past the branch tail's
    /// ghost.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` when the condition does not exist;
    /// `InvalidPlacement` for non-step kinds, terminal-only payloads (a
    /// branch never sits immediately before the trunk end), a target that
    /// is not a condition, or a branch already ending in a fork.
    pub fn add_node_to_branch(
        &mut self,
        condition_id: &NodeId,
        side: BranchSide,
        kind: NodeKind,
        payload: Payload,
    ) -> Result<NodeId, EditError> {
        if !kind.is_step() {
            return Err(EditError::invalid_placement(
                kind,
                "only actions and conditions can be added to a branch",
            ));
        }
        if self.repo.require(condition_id)?.kind != NodeKind::Condition {
            return Err(EditError::invalid_placement(kind, "target is not a condition"));
        }
        if payload.is_terminal {
            return Err(EditError::invalid_placement(
                kind,
                "terminal steps cannot live inside a branch",
            ));
        }

        let mut staged = self.repo.clone();
        let branch = BranchRef::new(condition_id.clone(), side);
        let list = staged.branch_list(&branch).to_vec();

        let placeholder = list
            .iter()
            .find(|id| {
                staged
                    .node(id)
                    .is_some_and(|node| node.kind == NodeKind::Placeholder)
            })
            .cloned();
        let (attach_parent, attach_before) = if let Some(placeholder_id) = placeholder {
            (condition_id.clone(), placeholder_id)
        } else if let Some(tail_id) = list.last() {
            let tail = staged.require(tail_id)?;
            if tail.kind == NodeKind::Condition {
                return Err(EditError::invalid_placement(
                    kind,
                    "branch already ends in a fork",
                ));
            }
            let ghost = staged
                .ghost_child(tail_id)
                .ok_or_else(|| EditError::ReferenceNotFound { id: tail_id.clone() })?;
            (tail_id.clone(), ghost)
        } else {
            // An un-repaired empty branch; stand a placeholder up first.
            let placeholder_id =
                splice::install_placeholder(&mut staged, &mut self.ids, condition_id, side);
            (condition_id.clone(), placeholder_id)
        };

        let id = self.ids.allocate(kind);
        let node = if kind == NodeKind::Condition {
            Node::condition(id.clone(), payload)
        } else {
            Node::chain(id.clone(), kind, payload)
        };
        staged.insert_node(node);
        splice::attach_chain_before(
            &mut staged,
            &mut self.ids,
            slice::from_ref(&id),
            &attach_parent,
            &attach_before,
        )?;
        maintenance::run(&mut staged, &mut self.ids);

        debug!(node = %id, %kind, condition = %condition_id, %side, "added node to branch");
        self.commit(staged);
        Ok(id)
    }

    /// Deletes a step, a condition (with both branch subtrees), or a
    /// sticky note.
    ///
    /// Surviving children are spliced into the deleted node's slot; a
    /// deleted fork reconnects its parent to the trunk end (recreating one
    /// if none exists) or leaves a ghost/placeholder behind inside a
    /// branch. A `NodesRemoved` event carries every removed id so the
    /// selection owner can clear a dangling selection.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` when the node does not exist; `InvalidPlacement`
    /// for engine-managed kinds (trigger, end, placeholder, ghost).
    pub fn delete(&mut self, node_id: &NodeId) -> Result<(), EditError> {
        let kind = self.repo.require(node_id)?.kind;

        if kind == NodeKind::StickyNote {
            let mut staged = self.repo.clone();
            staged.remove_node(node_id);
            debug!(node = %node_id, "deleted sticky note");
            self.events.push(EditorEvent::NodesRemoved {
                ids: vec![node_id.clone()],
            });
            self.commit(staged);
            return Ok(());
        }
        if kind.is_engine_managed() {
            return Err(EditError::invalid_placement(
                kind,
                "engine-managed nodes cannot be deleted directly",
            ));
        }

        let mut staged = self.repo.clone();
        // A fork takes both branch subtrees with it; a plain step goes
        // alone (its children are spliced upward, its ghost discarded).
        let removed = if kind == NodeKind::Condition {
            staged.collect_subtree(node_id)
        } else {
            vec![node_id.clone()]
        };
        splice::detach_chain(&mut staged, &mut self.ids, slice::from_ref(node_id))?;
        for id in removed.iter().rev() {
            staged.remove_node(id);
        }
        maintenance::run(&mut staged, &mut self.ids);

        debug!(node = %node_id, %kind, removed = removed.len(), "deleted node");
        self.events.push(EditorEvent::NodesRemoved { ids: removed });
        self.commit(staged);
        Ok(())
    }

    /// Replaces a node's configuration payload. Structure is untouched.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` when the node does not exist; `InvalidPlacement`
    /// for engine-managed kinds, which carry no configuration.
    pub fn update_payload(&mut self, node_id: &NodeId, payload: Payload) -> Result<(), EditError> {
        let kind = self.repo.require(node_id)?.kind;
        if kind.is_engine_managed() {
            return Err(EditError::invalid_placement(
                kind,
                "bookkeeping nodes carry no configuration",
            ));
        }
        if let Some(node) = self.repo.node_mut(node_id) {
            node.payload = payload;
        }
        debug!(node = %node_id, "updated payload");
        self.events.push(EditorEvent::GraphChanged);
        Ok(())
    }

    /// Adds a free-floating sticky note outside the trunk/branch structure.
    pub fn add_sticky_note(&mut self, payload: Payload) -> NodeId {
        let id = self.ids.allocate(NodeKind::StickyNote);
        self.repo
            .insert_node(Node::chain(id.clone(), NodeKind::StickyNote, payload));
        debug!(node = %id, "added sticky note");
        self.events.push(EditorEvent::GraphChanged);
        id
    }

    /// Swaps a staged, maintained repository in and signals the change.
    pub(crate) fn commit(&mut self, staged: Repository) {
        debug_assert_eq!(staged.validate(), Ok(()));
        self.repo = staged;
        self.events.push(EditorEvent::GraphChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_of(editor: &GraphEditor, ids: &[NodeId]) -> Vec<NodeKind> {
        ids.iter()
            .map(|id| editor.repository().node(id).unwrap().kind)
            .collect()
    }

    fn trunk_kinds(editor: &GraphEditor) -> Vec<NodeKind> {
        let trunk = editor.repository().trunk();
        kinds_of(editor, &trunk)
    }

    fn branch_list(editor: &GraphEditor, condition: &NodeId, side: BranchSide) -> Vec<NodeId> {
        editor
            .repository()
            .node(condition)
            .unwrap()
            .branches
            .as_ref()
            .unwrap()
            .list(side)
            .to_vec()
    }

    /// Scenario A: insert a condition in front of the seeded end marker.
    #[test]
    fn inserting_condition_before_end_consumes_the_marker() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        let condition = editor
            .insert(
                NodeKind::Condition,
                &trigger,
                &end,
                Payload::labeled("Check Status"),
            )
            .expect("insert condition");

        assert!(!editor.repository().contains(&end), "end marker deleted");
        assert_eq!(trunk_kinds(&editor), vec![NodeKind::Trigger, NodeKind::Condition]);

        for side in BranchSide::BOTH {
            let list = branch_list(&editor, &condition, side);
            assert_eq!(list.len(), 1);
            assert_eq!(
                editor.repository().node(&list[0]).unwrap().kind,
                NodeKind::Placeholder
            );
        }
        editor.repository().validate().expect("invariants hold");
    }

    /// Scenario B: materialize an action in the yes branch.
    #[test]
    fn adding_action_to_branch_replaces_placeholder() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let condition = editor
            .insert(NodeKind::Condition, &trigger, &end, Payload::labeled("Check Status"))
            .unwrap();
        let placeholder = branch_list(&editor, &condition, BranchSide::Yes)[0].clone();

        let action = editor
            .add_node_to_branch(
                &condition,
                BranchSide::Yes,
                NodeKind::Action,
                Payload::labeled("Send Email"),
            )
            .expect("add to branch");

        assert!(!editor.repository().contains(&placeholder), "placeholder removed");
        assert_eq!(branch_list(&editor, &condition, BranchSide::Yes), vec![action.clone()]);

        let ghost = editor
            .repository()
            .ghost_child(&action)
            .expect("action has a ghost continuation");
        assert_eq!(
            editor.repository().node(&action).unwrap().children,
            vec![ghost]
        );
        editor.repository().validate().expect("invariants hold");
    }

    /// Scenario C: extend the branch past its ghost.
    #[test]
    fn inserting_before_ghost_extends_branch_chain() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let condition = editor
            .insert(NodeKind::Condition, &trigger, &end, Payload::labeled("Check Status"))
            .unwrap();
        let email = editor
            .add_node_to_branch(
                &condition,
                BranchSide::Yes,
                NodeKind::Action,
                Payload::labeled("Send Email"),
            )
            .unwrap();
        let old_ghost = editor.repository().ghost_child(&email).unwrap();

        let sms = editor
            .insert(NodeKind::Action, &email, &old_ghost, Payload::labeled("Send SMS"))
            .expect("insert before ghost");

        assert!(!editor.repository().contains(&old_ghost), "old ghost deleted");
        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![email.clone(), sms.clone()]
        );
        assert_eq!(
            editor.repository().node(&email).unwrap().children,
            vec![sms.clone()]
        );
        assert!(editor.repository().ghost_child(&sms).is_some());
        editor.repository().validate().expect("invariants hold");
    }

    /// Scenario D: deleting the condition tears down both branches and
    /// restores the trunk end.
    #[test]
    fn deleting_condition_restores_trunk_end() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let condition = editor
            .insert(NodeKind::Condition, &trigger, &end, Payload::labeled("Check Status"))
            .unwrap();
        let email = editor
            .add_node_to_branch(
                &condition,
                BranchSide::Yes,
                NodeKind::Action,
                Payload::labeled("Send Email"),
            )
            .unwrap();
        let ghost = editor.repository().ghost_child(&email).unwrap();
        let sms = editor
            .insert(NodeKind::Action, &email, &ghost, Payload::labeled("Send SMS"))
            .unwrap();
        let no_placeholder = branch_list(&editor, &condition, BranchSide::No)[0].clone();
        editor.drain_events();

        editor.delete(&condition).expect("delete condition");

        for gone in [&condition, &email, &sms, &no_placeholder] {
            assert!(!editor.repository().contains(gone));
        }
        assert_eq!(trunk_kinds(&editor), vec![NodeKind::Trigger, NodeKind::End]);
        let new_end = editor.repository().trunk_end().unwrap();
        assert_ne!(new_end, end, "marker ids are never reused");

        // Removal is signalled so the selection owner can clear state.
        let events = editor.drain_events();
        let removed = events.iter().find_map(|event| match event {
            EditorEvent::NodesRemoved { ids } => Some(ids.clone()),
            _ => None,
        });
        let removed = removed.expect("NodesRemoved emitted");
        assert!(removed.contains(&condition));
        assert!(removed.contains(&email));
        assert!(removed.contains(&sms));
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn deleting_interior_trunk_action_reconnects_child() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let first = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("First"))
            .unwrap();
        let second = editor
            .insert(NodeKind::Action, &first, &end, Payload::labeled("Second"))
            .unwrap();

        editor.delete(&first).expect("delete interior action");

        let trunk = editor.repository().trunk();
        assert_eq!(trunk, vec![trigger.clone(), second.clone(), end.clone()]);
        assert_eq!(
            editor.repository().node(&second).unwrap().parent.as_ref(),
            Some(&trigger)
        );
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn inserting_condition_mid_trunk_absorbs_downstream_into_yes() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let first = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("First"))
            .unwrap();
        let second = editor
            .insert(NodeKind::Action, &first, &end, Payload::labeled("Second"))
            .unwrap();

        let condition = editor
            .insert(NodeKind::Condition, &trigger, &first, Payload::labeled("Gate"))
            .expect("insert condition mid-trunk");

        // The trunk ends at the fork; the end marker is gone, not moved.
        assert_eq!(trunk_kinds(&editor), vec![NodeKind::Trigger, NodeKind::Condition]);
        assert!(!editor.repository().contains(&end));

        // The former downstream chain lives in yes; its tail grew a ghost.
        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![first.clone(), second.clone()]
        );
        assert!(editor.repository().ghost_child(&second).is_some());

        // no got a fresh placeholder.
        let no = branch_list(&editor, &condition, BranchSide::No);
        assert_eq!(
            editor.repository().node(&no[0]).unwrap().kind,
            NodeKind::Placeholder
        );
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn terminal_step_only_sits_before_the_end_marker() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let action = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("Work"))
            .unwrap();

        let err = editor
            .insert(
                NodeKind::Action,
                &trigger,
                &action,
                Payload::labeled("Stop").terminal(),
            )
            .unwrap_err();
        assert!(matches!(err, EditError::InvalidPlacement { .. }));

        editor
            .insert(NodeKind::Action, &action, &end, Payload::labeled("Stop").terminal())
            .expect("terminal step before end is allowed");
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn failed_insert_leaves_repository_untouched() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let before = editor.repository().trunk_end().unwrap();
        let snapshot = editor.repository().clone();

        let missing = NodeId::from("action-999");
        assert!(editor
            .insert(NodeKind::Action, &missing, &before, Payload::default())
            .is_err());
        assert!(editor
            .insert(NodeKind::Action, &trigger, &missing, Payload::default())
            .is_err());
        assert!(editor
            .insert(NodeKind::Trigger, &trigger, &before, Payload::default())
            .is_err());

        assert_eq!(editor.repository(), &snapshot);
    }

    #[test]
    fn engine_managed_nodes_cannot_be_deleted() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        for protected in [&trigger, &end] {
            let err = editor.delete(protected).unwrap_err();
            assert!(matches!(err, EditError::InvalidPlacement { .. }));
        }
    }

    #[test]
    fn deleted_ids_are_never_reissued() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        let first = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::default())
            .unwrap();
        editor.delete(&first).unwrap();
        let second = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::default())
            .unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn sticky_notes_live_outside_the_structure() {
        let mut editor = GraphEditor::new();
        let note = editor.add_sticky_note(Payload::labeled("Remember the webhook"));

        assert!(editor.repository().node(&note).unwrap().parent.is_none());
        editor.repository().validate().expect("invariants hold");

        editor.delete(&note).expect("sticky notes are deletable");
        assert!(!editor.repository().contains(&note));
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn persistence_roundtrip_preserves_structure_and_allocator() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let action = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("Work"))
            .unwrap();

        let nodes = editor.into_nodes();
        let mut restored = GraphEditor::from_nodes(nodes);
        restored.repository().validate().expect("restored repository is valid");

        // The rebuilt allocator must not reissue the persisted action id.
        let end = restored.repository().trunk_end().unwrap();
        let fresh = restored
            .insert(NodeKind::Action, &action, &end, Payload::default())
            .unwrap();
        assert_ne!(fresh, action);
    }

    /// Invariant closure: a scripted editing session, validated after
    /// every operation.
    #[test]
    fn invariants_hold_across_an_editing_session() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        let first = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("Fetch"))
            .unwrap();
        editor.repository().validate().unwrap();

        let gate = editor
            .insert(NodeKind::Condition, &first, &end, Payload::labeled("Has rows?"))
            .unwrap();
        editor.repository().validate().unwrap();

        let notify = editor
            .add_node_to_branch(&gate, BranchSide::Yes, NodeKind::Action, Payload::labeled("Notify"))
            .unwrap();
        editor.repository().validate().unwrap();

        let inner = editor
            .add_node_to_branch(
                &gate,
                BranchSide::No,
                NodeKind::Condition,
                Payload::labeled("Retry?"),
            )
            .unwrap();
        editor.repository().validate().unwrap();

        editor
            .add_node_to_branch(&inner, BranchSide::Yes, NodeKind::Action, Payload::labeled("Retry"))
            .unwrap();
        editor.repository().validate().unwrap();

        editor.delete(&notify).unwrap();
        editor.repository().validate().unwrap();

        editor.delete(&gate).unwrap();
        editor.repository().validate().unwrap();

        assert_eq!(trunk_kinds(&editor), vec![
            NodeKind::Trigger,
            NodeKind::Action,
            NodeKind::End,
        ]);
        assert_eq!(
            editor.repository().node(&first).unwrap().kind,
            NodeKind::Action
        );
    }
}

//! Relocation and duplication of steps.
//!
//! Moving is detach-then-splice: the source is repaired exactly as a
//! delete would repair it (minus the removal), then the node or chain is
//! attached at the target the way an insert would attach it. Duplication
//! clones one node's immediate shape with a fresh id.

use crate::error::EditError;
use crate::node::{BranchRef, BranchSide, Node, NodeId, NodeKind};
use crate::splice;
use crate::{maintenance, GraphEditor};
use std::slice;
use tracing::debug;

impl GraphEditor {
    /// Relocates exactly one step. Its former children are reconnected to
    /// its former parent before it is spliced in at the target, displacing
    /// `target_before` downward. A moved condition keeps its branch
    /// subtrees, and the displaced destination chain attaches under its
    /// deepest `yes` tail.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` for unknown or unrelated ids;
    /// `InvalidPlacement` for non-step kinds or a target inside the moved
    /// subtree.
    pub fn move_node(
        &mut self,
        node_id: &NodeId,
        target_parent: &NodeId,
        target_before: &NodeId,
    ) -> Result<(), EditError> {
        let node = self.repo.require(node_id)?;
        if !node.is_step() {
            return Err(EditError::invalid_placement(
                node.kind,
                "only actions and conditions can be moved",
            ));
        }
        let kind = node.kind;
        let current_parent = node.parent.clone();
        self.repo.require_child_of(target_parent, target_before)?;

        // Moving in front of its own successor is the identity.
        let before_parent = self.repo.require(target_before)?.parent.clone();
        if before_parent.as_ref() == Some(node_id) && current_parent.as_ref() == Some(target_parent)
        {
            return Ok(());
        }

        let moved = if kind == NodeKind::Condition {
            self.repo.collect_subtree(node_id)
        } else {
            vec![node_id.clone()]
        };
        if moved.contains(target_parent) || moved.contains(target_before) {
            return Err(EditError::invalid_placement(
                kind,
                "target lies within the moved subtree",
            ));
        }

        let mut staged = self.repo.clone();
        splice::detach_chain(&mut staged, &mut self.ids, slice::from_ref(node_id))?;
        splice::attach_chain_before(
            &mut staged,
            &mut self.ids,
            slice::from_ref(node_id),
            target_parent,
            target_before,
        )?;
        maintenance::run(&mut staged, &mut self.ids);

        debug!(node = %node_id, parent = %target_parent, before = %target_before, "moved node");
        self.commit(staged);
        Ok(())
    }

    /// Relocates a step and its entire downstream chain (including the
    /// branch subtrees of every condition in it) as a unit. Only what
    /// followed the whole chain is reconnected at the source.
    ///
    /// # Errors
    ///
    /// As [`GraphEditor::move_node`].
    pub fn move_flow(
        &mut self,
        start_id: &NodeId,
        target_parent: &NodeId,
        target_before: &NodeId,
    ) -> Result<(), EditError> {
        let start = self.repo.require(start_id)?;
        if !start.is_step() {
            return Err(EditError::invalid_placement(
                start.kind,
                "only actions and conditions can head a moved flow",
            ));
        }
        let kind = start.kind;
        self.repo.require_child_of(target_parent, target_before)?;

        let chain = self.repo.step_chain(start_id);
        let moved = self.repo.collect_subtree(start_id);
        if moved.contains(target_parent) || moved.contains(target_before) {
            return Err(EditError::invalid_placement(
                kind,
                "target lies within the moved flow",
            ));
        }

        let mut staged = self.repo.clone();
        splice::detach_chain(&mut staged, &mut self.ids, &chain)?;
        splice::attach_chain_before(
            &mut staged,
            &mut self.ids,
            &chain,
            target_parent,
            target_before,
        )?;
        maintenance::run(&mut staged, &mut self.ids);

        debug!(
            start = %start_id,
            length = chain.len(),
            parent = %target_parent,
            before = %target_before,
            "moved flow"
        );
        self.commit(staged);
        Ok(())
    }

    /// Clones a single step with a fresh id and unconfigured payload.
    ///
    /// An action's clone takes its place in the chain: the original's
    /// former child becomes the clone's child. A condition's clone becomes
    /// the new head of the original's `yes` branch, absorbing the branch's
    /// former contents as its own `yes` chain (contents are moved, never
    /// duplicated); its `no` starts with a fresh placeholder.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` for unknown ids; `InvalidPlacement` for
    /// non-step kinds.
    pub fn duplicate(&mut self, node_id: &NodeId) -> Result<NodeId, EditError> {
        let node = self.repo.require(node_id)?.clone();
        if !node.is_step() {
            return Err(EditError::invalid_placement(
                node.kind,
                "only actions and conditions can be duplicated",
            ));
        }

        let mut staged = self.repo.clone();
        let clone_id = self.ids.allocate(node.kind);
        let mut payload = node.payload.clone();
        payload.reset_configuration();

        match node.kind {
            NodeKind::Action => {
                let before = node
                    .first_child()
                    .cloned()
                    .ok_or_else(|| EditError::ReferenceNotFound { id: node_id.clone() })?;
                staged.insert_node(Node::chain(clone_id.clone(), NodeKind::Action, payload));
                splice::attach_chain_before(
                    &mut staged,
                    &mut self.ids,
                    slice::from_ref(&clone_id),
                    node_id,
                    &before,
                )?;
            }
            _ => {
                // Condition: the clone heads the original's yes branch.
                let former_yes = node
                    .branches
                    .as_ref()
                    .map(|branches| branches.yes.clone())
                    .unwrap_or_default();
                let absorbed: Vec<NodeId> = former_yes
                    .iter()
                    .filter(|id| staged.node(id).is_some_and(Node::is_step))
                    .cloned()
                    .collect();
                for id in &former_yes {
                    if staged
                        .node(id)
                        .is_some_and(|node| node.kind == NodeKind::Placeholder)
                    {
                        staged.remove_node(id);
                    }
                }

                let mut clone = Node::condition(clone_id.clone(), payload);
                clone.parent = Some(node_id.clone());
                clone.branch = Some(BranchRef::new(node_id.clone(), BranchSide::Yes));
                if let Some(branches) = clone.branches.as_mut() {
                    branches.yes = absorbed.clone();
                }
                staged.insert_node(clone);

                if let Some(branches) = staged
                    .node_mut(node_id)
                    .and_then(|original| original.branches.as_mut())
                {
                    branches.yes = vec![clone_id.clone()];
                }
                if let Some(head) = absorbed.first()
                    && let Some(head_node) = staged.node_mut(head)
                {
                    head_node.parent = Some(clone_id.clone());
                }
                splice::set_container(
                    &mut staged,
                    &absorbed,
                    Some(&BranchRef::new(clone_id.clone(), BranchSide::Yes)),
                );
            }
        }
        maintenance::run(&mut staged, &mut self.ids);

        debug!(original = %node_id, clone = %clone_id, kind = %node.kind, "duplicated node");
        self.commit(staged);
        Ok(clone_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Payload;

    fn trunk_of(editor: &GraphEditor) -> Vec<NodeId> {
        editor.repository().trunk()
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

    /// trigger -> a -> b -> end
    fn two_step_trunk() -> (GraphEditor, NodeId, NodeId, NodeId, NodeId) {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let a = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("A"))
            .unwrap();
        let b = editor
            .insert(NodeKind::Action, &a, &end, Payload::labeled("B"))
            .unwrap();
        (editor, trigger, a, b, end)
    }

    #[test]
    fn move_node_reorders_trunk_actions() {
        let (mut editor, trigger, a, b, end) = two_step_trunk();

        // a moves behind b: trigger -> b -> a -> end
        editor.move_node(&a, &b, &end).expect("move node");

        assert_eq!(trunk_of(&editor), vec![trigger, b, a, end]);
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn move_node_into_branch_takes_the_ghost_slot() {
        let (mut editor, _trigger, a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();
        let ghost = editor.repository().ghost_child(&yes_action).unwrap();

        editor.move_node(&a, &yes_action, &ghost).expect("move into branch");

        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![yes_action.clone(), a.clone()]
        );
        let moved = editor.repository().node(&a).unwrap();
        assert_eq!(
            moved.branch,
            Some(BranchRef::new(condition.clone(), BranchSide::Yes))
        );
        assert!(editor.repository().ghost_child(&a).is_some());
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn moving_a_branchs_only_step_out_restores_its_placeholder() {
        let (mut editor, _trigger, a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();

        // Move it up onto the trunk, in front of b.
        editor.move_node(&yes_action, &a, &b).expect("move out of branch");

        let yes = branch_list(&editor, &condition, BranchSide::Yes);
        assert_eq!(yes.len(), 1);
        assert_eq!(
            editor.repository().node(&yes[0]).unwrap().kind,
            NodeKind::Placeholder
        );
        assert!(editor.repository().node(&yes_action).unwrap().branch.is_none());
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn moving_condition_attaches_displaced_chain_under_yes_tail() {
        let (mut editor, trigger, a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();

        // Move the fork to the front of the trunk. The displaced chain
        // (a -> b) lands after the yes tail.
        editor.move_node(&condition, &trigger, &a).expect("move condition");

        assert_eq!(trunk_of(&editor), vec![trigger, condition.clone()]);
        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![yes_action.clone(), a.clone(), b.clone()]
        );
        assert_eq!(
            editor.repository().node(&a).unwrap().parent.as_ref(),
            Some(&yes_action)
        );
        // b dangled after losing the end marker; it grew a ghost.
        assert!(editor.repository().ghost_child(&b).is_some());
        assert_eq!(
            editor
                .repository()
                .iter()
                .filter(|node| node.kind == NodeKind::End)
                .count(),
            0
        );
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn move_flow_relocates_whole_chain() {
        let (mut editor, trigger, a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();

        // Move b -> gate (the whole downstream flow from b) to the front
        // of the trunk. The displaced a lands after the gate's yes tail.
        editor.move_flow(&b, &trigger, &a).expect("move flow");

        assert_eq!(trunk_of(&editor), vec![trigger, b.clone(), condition.clone()]);
        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![yes_action.clone(), a.clone()]
        );
        assert_eq!(
            editor.repository().node(&a).unwrap().parent.as_ref(),
            Some(&yes_action)
        );
        assert!(editor.repository().ghost_child(&a).is_some());
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn move_rejects_target_inside_moved_subtree() {
        let (mut editor, _trigger, _a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();
        let ghost = editor.repository().ghost_child(&yes_action).unwrap();
        let snapshot = editor.repository().clone();

        let err = editor.move_node(&condition, &yes_action, &ghost).unwrap_err();
        assert!(matches!(err, EditError::InvalidPlacement { .. }));
        assert_eq!(editor.repository(), &snapshot);
    }

    #[test]
    fn duplicate_action_splices_clone_after_original() {
        let (mut editor, trigger, a, b, end) = two_step_trunk();
        editor
            .update_payload(&a, {
                let mut payload = Payload::labeled("A");
                payload.is_configured = true;
                payload
            })
            .unwrap();

        let clone = editor.duplicate(&a).expect("duplicate action");

        assert_eq!(trunk_of(&editor), vec![trigger, a.clone(), clone.clone(), b, end]);
        let cloned = editor.repository().node(&clone).unwrap();
        assert_eq!(cloned.payload.label, "A");
        assert!(!cloned.payload.is_configured, "clones start unconfigured");
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn duplicate_branch_tail_action_keeps_single_ghost() {
        let (mut editor, _trigger, _a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();

        let clone = editor.duplicate(&yes_action).expect("duplicate in branch");

        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![yes_action.clone(), clone.clone()]
        );
        assert_eq!(
            editor.repository().node(&yes_action).unwrap().children,
            vec![clone.clone()]
        );
        assert!(editor.repository().ghost_child(&clone).is_some());
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn duplicate_condition_heads_the_original_yes_branch() {
        let (mut editor, _trigger, _a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();
        let yes_action = editor
            .add_node_to_branch(&condition, BranchSide::Yes, NodeKind::Action, Payload::labeled("Y"))
            .unwrap();

        let clone = editor.duplicate(&condition).expect("duplicate condition");

        // The clone took over the original's yes content.
        assert_eq!(
            branch_list(&editor, &condition, BranchSide::Yes),
            vec![clone.clone()]
        );
        assert_eq!(
            branch_list(&editor, &clone, BranchSide::Yes),
            vec![yes_action.clone()]
        );
        let no = branch_list(&editor, &clone, BranchSide::No);
        assert_eq!(
            editor.repository().node(&no[0]).unwrap().kind,
            NodeKind::Placeholder
        );
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn duplicate_condition_with_empty_yes_gets_two_placeholders() {
        let (mut editor, _trigger, _a, b, end) = two_step_trunk();
        let condition = editor
            .insert(NodeKind::Condition, &b, &end, Payload::labeled("Gate"))
            .unwrap();

        let clone = editor.duplicate(&condition).expect("duplicate condition");

        for side in BranchSide::BOTH {
            let list = branch_list(&editor, &clone, side);
            assert_eq!(list.len(), 1);
            assert_eq!(
                editor.repository().node(&list[0]).unwrap().kind,
                NodeKind::Placeholder
            );
        }
        editor.repository().validate().expect("invariants hold");
    }
}

//! Copy, cut, and paste.
//!
//! The clipboard holds either one node's shape (kind + payload) or a
//! detached snapshot of a connected subtree (a linear chain, or a full
//! conditional subtree including every nested branch). Pasting a subtree
//! builds the complete old-to-new id table before constructing a single
//! node, so forward references resolve, then splices the rebuilt chain in
//! as one synchronous transaction. The repository is swapped only after
//! the whole remap succeeds, and a partially-pasted tree is never
//! observable.
//!
//! Cut is copy plus deferred removal: the source subtree stays in place
//! until a paste succeeds, then is removed with delete semantics.

use crate::error::EditError;
use crate::events::EditorEvent;
use crate::node::{BranchRef, Node, NodeId, NodeKind, Payload};
use crate::splice;
use crate::{maintenance, GraphEditor};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::slice;
use tracing::debug;

/// The queryable clipboard state, for paste affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardState {
    Empty,
    Node,
    Flow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClipMode {
    Copy,
    Cut,
}

#[derive(Debug, Clone)]
pub(crate) enum ClipboardData {
    /// One node's shape.
    Node { kind: NodeKind, payload: Payload },
    /// A detached snapshot of a connected subtree, pre-order, original ids.
    Flow { root: NodeId, nodes: Vec<Node> },
}

#[derive(Debug, Clone)]
pub(crate) struct ClipEntry {
    pub(crate) data: ClipboardData,
    pub(crate) mode: ClipMode,
    /// Original location of a cut subtree, removed once paste succeeds.
    pub(crate) source: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Clipboard {
    pub(crate) entry: Option<ClipEntry>,
}

impl Clipboard {
    pub(crate) fn state(&self) -> ClipboardState {
        match &self.entry {
            None => ClipboardState::Empty,
            Some(entry) => match entry.data {
                ClipboardData::Node { .. } => ClipboardState::Node,
                ClipboardData::Flow { .. } => ClipboardState::Flow,
            },
        }
    }
}

impl GraphEditor {
    /// Returns the clipboard state for paste affordances.
    #[must_use]
    pub fn clipboard_state(&self) -> ClipboardState {
        self.clipboard.state()
    }

    /// Empties the clipboard.
    pub fn clear_clipboard(&mut self) {
        if self.clipboard.entry.take().is_some() {
            self.events.push(EditorEvent::ClipboardChanged {
                state: ClipboardState::Empty,
            });
        }
    }

    /// Copies one step's shape. The source is untouched and the clipboard
    /// is repeatable.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` for unknown ids; `InvalidPlacement` for
    /// non-step kinds.
    pub fn copy_node(&mut self, node_id: &NodeId) -> Result<(), EditError> {
        self.capture_node(node_id, ClipMode::Copy)
    }

    /// Cuts one step: copies its shape and removes it once a paste
    /// succeeds.
    ///
    /// # Errors
    ///
    /// As [`GraphEditor::copy_node`].
    pub fn cut_node(&mut self, node_id: &NodeId) -> Result<(), EditError> {
        self.capture_node(node_id, ClipMode::Cut)
    }

    fn capture_node(&mut self, node_id: &NodeId, mode: ClipMode) -> Result<(), EditError> {
        let node = self.repo.require(node_id)?;
        if !node.is_step() {
            return Err(EditError::invalid_placement(
                node.kind,
                "only actions and conditions can be copied",
            ));
        }
        self.clipboard.entry = Some(ClipEntry {
            data: ClipboardData::Node {
                kind: node.kind,
                payload: node.payload.clone(),
            },
            mode,
            source: (mode == ClipMode::Cut).then(|| node_id.clone()),
        });
        debug!(node = %node_id, ?mode, "captured node");
        self.events.push(EditorEvent::ClipboardChanged {
            state: ClipboardState::Node,
        });
        Ok(())
    }

    /// Copies a step and its entire downstream subtree: the chain through
    /// `children` plus every nested branch, placeholders and ghosts
    /// included. The trunk end marker is never captured.
    ///
    /// # Errors
    ///
    /// As [`GraphEditor::copy_node`].
    pub fn copy_flow(&mut self, start_id: &NodeId) -> Result<(), EditError> {
        self.capture_flow(start_id, ClipMode::Copy)
    }

    /// Cuts a subtree: copies it and removes the source once a paste
    /// succeeds.
    ///
    /// # Errors
    ///
    /// As [`GraphEditor::copy_node`].
    pub fn cut_flow(&mut self, start_id: &NodeId) -> Result<(), EditError> {
        self.capture_flow(start_id, ClipMode::Cut)
    }

    fn capture_flow(&mut self, start_id: &NodeId, mode: ClipMode) -> Result<(), EditError> {
        let start = self.repo.require(start_id)?;
        if !start.is_step() {
            return Err(EditError::invalid_placement(
                start.kind,
                "only actions and conditions can head a copied flow",
            ));
        }

        let collected = self.repo.collect_subtree(start_id);
        let nodes: Vec<Node> = collected
            .iter()
            .filter_map(|id| self.repo.node(id).cloned())
            .collect();
        self.clipboard.entry = Some(ClipEntry {
            data: ClipboardData::Flow {
                root: start_id.clone(),
                nodes,
            },
            mode,
            source: (mode == ClipMode::Cut).then(|| start_id.clone()),
        });
        debug!(start = %start_id, count = collected.len(), ?mode, "captured flow");
        self.events.push(EditorEvent::ClipboardChanged {
            state: ClipboardState::Flow,
        });
        Ok(())
    }

    /// Pastes the clipboard in front of `before` under `parent`, returning
    /// the id of the pasted root. Every pasted node gets a fresh id; a
    /// single-node paste also resets its configuration.
    ///
    /// After a successful cut-paste the source subtree is removed and the
    /// clipboard empties; a copy stays repeatable.
    ///
    /// # Errors
    ///
    /// `EmptyClipboard` with nothing captured; `ReferenceNotFound` /
    /// `InvalidPlacement` as for insert (including a cut-paste whose
    /// target lies inside the cut source); `MalformedSubtree` when the
    /// snapshot references an id absent from the collected set.
    pub fn paste(&mut self, parent_id: &NodeId, before_id: &NodeId) -> Result<NodeId, EditError> {
        let entry = self.clipboard.entry.clone().ok_or(EditError::EmptyClipboard)?;
        self.repo.require_child_of(parent_id, before_id)?;

        // A cut-paste must land outside the subtree it is about to remove.
        if entry.mode == ClipMode::Cut
            && let Some(source) = &entry.source
            && self.repo.contains(source)
            && (self.repo.is_within(source, parent_id) || self.repo.is_within(source, before_id))
        {
            let kind = self.repo.require(source)?.kind;
            return Err(EditError::invalid_placement(
                kind,
                "paste target lies within the cut source",
            ));
        }

        let mut staged = self.repo.clone();
        let pasted_root = match &entry.data {
            ClipboardData::Node { kind, payload } => {
                let mut payload = payload.clone();
                payload.reset_configuration();
                if payload.is_terminal && staged.require(before_id)?.kind != NodeKind::End {
                    return Err(EditError::invalid_placement(
                        *kind,
                        "terminal steps may only sit immediately before the end marker",
                    ));
                }
                let id = self.ids.allocate(*kind);
                let node = if *kind == NodeKind::Condition {
                    Node::condition(id.clone(), payload)
                } else {
                    Node::chain(id.clone(), *kind, payload)
                };
                staged.insert_node(node);
                splice::attach_chain_before(
                    &mut staged,
                    &mut self.ids,
                    slice::from_ref(&id),
                    parent_id,
                    before_id,
                )?;
                id
            }
            ClipboardData::Flow { root, nodes } => {
                self.paste_flow(&mut staged, root, nodes, parent_id, before_id)?
            }
        };

        // Remove the cut source, now that the paste has landed.
        let mut removed = Vec::new();
        if entry.mode == ClipMode::Cut
            && let Some(source) = &entry.source
            && staged.contains(source)
        {
            // A condition source takes its branch subtrees with it, even
            // when only the node itself was captured.
            let source_is_fork = staged
                .node(source)
                .is_some_and(|node| node.kind == NodeKind::Condition);
            removed = if source_is_fork || matches!(entry.data, ClipboardData::Flow { .. }) {
                staged.collect_subtree(source)
            } else {
                vec![source.clone()]
            };
            let source_chain = match &entry.data {
                ClipboardData::Node { .. } => vec![source.clone()],
                ClipboardData::Flow { .. } => staged.step_chain(source),
            };
            splice::detach_chain(&mut staged, &mut self.ids, &source_chain)?;
            for id in removed.iter().rev() {
                staged.remove_node(id);
            }
        }
        maintenance::run(&mut staged, &mut self.ids);

        if entry.mode == ClipMode::Cut {
            self.clipboard.entry = None;
            self.events.push(EditorEvent::ClipboardChanged {
                state: ClipboardState::Empty,
            });
        }
        if !removed.is_empty() {
            self.events.push(EditorEvent::NodesRemoved { ids: removed });
        }
        debug!(root = %pasted_root, parent = %parent_id, before = %before_id, "pasted");
        self.commit(staged);
        Ok(pasted_root)
    }

    /// Rebuilds a snapshot with fresh ids and splices it in.
    fn paste_flow(
        &mut self,
        staged: &mut crate::repository::Repository,
        root: &NodeId,
        nodes: &[Node],
        parent_id: &NodeId,
        before_id: &NodeId,
    ) -> Result<NodeId, EditError> {
        // Every internal reference must resolve inside the collected set.
        let present: HashSet<&NodeId> = nodes.iter().map(|node| &node.id).collect();
        if !present.contains(root) {
            return Err(EditError::MalformedSubtree {
                missing: root.clone(),
            });
        }
        for node in nodes {
            for child in &node.children {
                if !present.contains(child) {
                    return Err(EditError::MalformedSubtree {
                        missing: child.clone(),
                    });
                }
            }
            if let Some(branches) = &node.branches {
                for member in branches.yes.iter().chain(branches.no.iter()) {
                    if !present.contains(member) {
                        return Err(EditError::MalformedSubtree {
                            missing: member.clone(),
                        });
                    }
                }
            }
            if node.id != *root
                && let Some(node_parent) = &node.parent
                && !present.contains(node_parent)
            {
                return Err(EditError::MalformedSubtree {
                    missing: node_parent.clone(),
                });
            }
        }

        // One-pass table: every old id maps to a fresh one before any node
        // is constructed, so forward references resolve.
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        for node in nodes {
            remap.insert(node.id.clone(), self.ids.allocate(node.kind));
        }

        for node in nodes {
            let mut rebuilt = node.clone();
            rebuilt.id = remap[&node.id].clone();
            rebuilt.parent = node
                .parent
                .as_ref()
                .and_then(|parent| remap.get(parent).cloned());
            rebuilt.children = node
                .children
                .iter()
                .filter_map(|child| remap.get(child).cloned())
                .collect();
            if let Some(branches) = &mut rebuilt.branches {
                branches.yes = branches
                    .yes
                    .iter()
                    .filter_map(|member| remap.get(member).cloned())
                    .collect();
                branches.no = branches
                    .no
                    .iter()
                    .filter_map(|member| remap.get(member).cloned())
                    .collect();
            }
            // A membership reference outside the snapshot belongs to the
            // source location; the splice below assigns the real one.
            rebuilt.branch = node.branch.as_ref().and_then(|branch| {
                remap
                    .get(&branch.condition)
                    .map(|condition| BranchRef::new(condition.clone(), branch.side))
            });
            staged.insert_node(rebuilt);
        }

        let new_root = remap[root].clone();
        let chain = staged.step_chain(&new_root);

        // The destination supplies the continuation: the true tail drops
        // any ghost it carried over.
        if let Some(tail) = chain.last() {
            if let Some(ghost) = staged.ghost_child(tail) {
                staged.remove_node(&ghost);
                if let Some(tail_node) = staged.node_mut(tail) {
                    tail_node.set_child(None);
                }
            }
            let tail_terminal = staged
                .node(tail)
                .is_some_and(|node| node.payload.is_terminal);
            if tail_terminal && staged.require(before_id)?.kind != NodeKind::End {
                return Err(EditError::invalid_placement(
                    NodeKind::Action,
                    "terminal steps may only sit immediately before the end marker",
                ));
            }
        }

        splice::attach_chain_before(staged, &mut self.ids, &chain, parent_id, before_id)?;
        Ok(new_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BranchSide;

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

    /// The condition subtree from scenario C: trigger -> gate, with
    /// yes = [email -> sms -> ghost] and no = [placeholder].
    fn gated_editor() -> (GraphEditor, NodeId, NodeId, NodeId, NodeId) {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let gate = editor
            .insert(NodeKind::Condition, &trigger, &end, Payload::labeled("Check Status"))
            .unwrap();
        let email = editor
            .add_node_to_branch(&gate, BranchSide::Yes, NodeKind::Action, Payload::labeled("Send Email"))
            .unwrap();
        let ghost = editor.repository().ghost_child(&email).unwrap();
        let sms = editor
            .insert(NodeKind::Action, &email, &ghost, Payload::labeled("Send SMS"))
            .unwrap();
        (editor, trigger, gate, email, sms)
    }

    #[test]
    fn paste_with_empty_clipboard_fails() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        assert_eq!(editor.clipboard_state(), ClipboardState::Empty);
        let err = editor.paste(&trigger, &end).unwrap_err();
        assert_eq!(err, EditError::EmptyClipboard);
    }

    #[test]
    fn copy_paste_single_node_resets_configuration() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let original = editor
            .insert(NodeKind::Action, &trigger, &end, {
                let mut payload = Payload::labeled("Send Email");
                payload.is_configured = true;
                payload
            })
            .unwrap();

        editor.copy_node(&original).expect("copy");
        assert_eq!(editor.clipboard_state(), ClipboardState::Node);

        let pasted = editor.paste(&original, &end).expect("paste");
        assert_ne!(pasted, original);

        let node = editor.repository().node(&pasted).unwrap();
        assert_eq!(node.payload.label, "Send Email");
        assert!(!node.payload.is_configured);

        // Copy is repeatable.
        assert_eq!(editor.clipboard_state(), ClipboardState::Node);
        editor.paste(&pasted, &end).expect("paste again");
        editor.repository().validate().expect("invariants hold");
    }

    /// Scenario E: copy the conditional subtree, paste it at a different
    /// trunk position, original untouched.
    #[test]
    fn copy_paste_condition_subtree_is_isomorphic() {
        let (mut editor, trigger, gate, email, sms) = gated_editor();

        editor.copy_flow(&gate).expect("copy flow");
        assert_eq!(editor.clipboard_state(), ClipboardState::Flow);

        let pasted_gate = editor.paste(&trigger, &gate).expect("paste");
        assert_ne!(pasted_gate, gate);

        // Same shape, fresh ids; the displaced original gate hangs off the
        // pasted copy's deepest yes tail.
        let pasted_yes = branch_list(&editor, &pasted_gate, BranchSide::Yes);
        assert_eq!(pasted_yes.len(), 3);
        assert_eq!(pasted_yes[2], gate);
        for (fresh, original) in pasted_yes[..2].iter().zip([&email, &sms]) {
            let fresh_node = editor.repository().node(fresh).unwrap();
            assert_ne!(fresh, original);
            assert_eq!(fresh_node.kind, NodeKind::Action);
            assert_eq!(
                fresh_node.payload.label,
                editor.repository().node(original).unwrap().payload.label
            );
        }
        assert_eq!(
            editor.repository().node(&gate).unwrap().parent.as_ref(),
            Some(&pasted_yes[1])
        );

        // The copied branch shape survived the remap: the pasted no branch
        // holds a fresh placeholder.
        let pasted_no = branch_list(&editor, &pasted_gate, BranchSide::No);
        assert_eq!(pasted_no.len(), 1);
        assert_eq!(
            editor.repository().node(&pasted_no[0]).unwrap().kind,
            NodeKind::Placeholder
        );

        // Original subtree still present: copy, not cut.
        for survivor in [&gate, &email, &sms] {
            assert!(editor.repository().contains(survivor));
        }
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn paste_flow_into_empty_branch_consumes_placeholder() {
        let (mut editor, _trigger, gate, email, _sms) = gated_editor();

        // Copy the linear yes chain, then paste it into the no branch.
        editor.copy_flow(&email).expect("copy chain");
        let no_placeholder = branch_list(&editor, &gate, BranchSide::No)[0].clone();
        let pasted = editor.paste(&gate, &no_placeholder).expect("paste");

        assert!(!editor.repository().contains(&no_placeholder));
        let no = branch_list(&editor, &gate, BranchSide::No);
        assert_eq!(no.len(), 2);
        assert_eq!(no[0], pasted);
        let tail = no.last().unwrap();
        assert!(editor.repository().ghost_child(tail).is_some());
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn cut_paste_removes_source_and_empties_clipboard() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let a = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("A"))
            .unwrap();
        let b = editor
            .insert(NodeKind::Action, &a, &end, Payload::labeled("B"))
            .unwrap();

        editor.cut_flow(&b).expect("cut");
        // The source stays until the paste lands.
        assert!(editor.repository().contains(&b));

        let pasted = editor.paste(&trigger, &a).expect("paste");

        assert!(!editor.repository().contains(&b), "cut source removed");
        assert_eq!(editor.clipboard_state(), ClipboardState::Empty);
        assert_eq!(
            editor.repository().trunk(),
            vec![trigger.clone(), pasted, a.clone(), end.clone()]
        );

        let err = editor.paste(&trigger, &a).unwrap_err();
        assert_eq!(err, EditError::EmptyClipboard);
        editor.repository().validate().expect("invariants hold");
    }

    #[test]
    fn cut_paste_into_own_subtree_is_rejected() {
        let (mut editor, _trigger, gate, email, _sms) = gated_editor();

        editor.cut_flow(&gate).expect("cut");
        let inside_target = editor
            .repository()
            .node(&email)
            .unwrap()
            .children[0]
            .clone();
        let snapshot = editor.repository().clone();

        let err = editor.paste(&email, &inside_target).unwrap_err();
        assert!(matches!(err, EditError::InvalidPlacement { .. }));
        assert_eq!(editor.repository(), &snapshot);
        // The cut is still pending; the source was not removed.
        assert!(editor.repository().contains(&gate));
        assert_eq!(editor.clipboard_state(), ClipboardState::Flow);
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();

        // A snapshot whose chain references a node that was never
        // collected (e.g. a broken external clipboard).
        let mut head = Node::chain(NodeId::from("action-90"), NodeKind::Action, Payload::default());
        let missing = NodeId::from("action-91");
        head.set_child(Some(missing.clone()));
        editor.clipboard.entry = Some(ClipEntry {
            data: ClipboardData::Flow {
                root: head.id.clone(),
                nodes: vec![head],
            },
            mode: ClipMode::Copy,
            source: None,
        });

        let err = editor.paste(&trigger, &end).unwrap_err();
        assert_eq!(err, EditError::MalformedSubtree { missing });
    }

    #[test]
    fn clipboard_events_track_state() {
        let mut editor = GraphEditor::new();
        let trigger = editor.repository().trigger().unwrap().id.clone();
        let end = editor.repository().trunk_end().unwrap();
        let a = editor
            .insert(NodeKind::Action, &trigger, &end, Payload::labeled("A"))
            .unwrap();
        editor.drain_events();

        editor.copy_node(&a).unwrap();
        assert!(editor.drain_events().contains(&EditorEvent::ClipboardChanged {
            state: ClipboardState::Node,
        }));

        editor.clear_clipboard();
        assert!(editor.drain_events().contains(&EditorEvent::ClipboardChanged {
            state: ClipboardState::Empty,
        }));
    }
}

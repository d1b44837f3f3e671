//! Low-level chain surgery shared by the edit operations.
//!
//! Every structural operation reduces to two primitives over the arena:
//!
//! - [`detach_chain`]: lift a contiguous run of steps out of its container,
//!   repairing the source (predecessor relinked to what followed, or to a
//!   fresh end/ghost marker as the container requires)
//! - [`attach_chain_before`]: splice an already-constructed, detached chain
//!   in front of a target node, handling marker replacement, branch-list
//!   bookkeeping, and the fork semantics of a condition tail (the displaced
//!   downstream chain is absorbed into the deepest `yes` attachment point)
//!
//! Callers validate references up front and stage these mutations on a
//! clone of the repository, so a failure here never leaves a half-edited
//! arena visible.

use crate::error::EditError;
use crate::node::{BranchRef, BranchSide, IdAllocator, Node, NodeId, NodeKind, Payload};
use crate::repository::Repository;

/// Where a chain displaced by a condition connects underneath it.
pub(crate) enum YesAttach {
    /// The condition's `yes` branch is empty (placeholder at most); the
    /// displaced chain becomes the branch content itself.
    Empty { condition: NodeId },
    /// The deepest real `yes` tail is this action; the displaced chain
    /// continues after it.
    Tail { action: NodeId },
}

/// Resolves the attachment point under a condition's `yes` branch,
/// recursing through nested conditions.
pub(crate) fn resolve_yes_attach(repo: &Repository, condition: &NodeId) -> YesAttach {
    let mut current = condition.clone();
    loop {
        let last_step = repo
            .node(&current)
            .and_then(|node| node.branches.as_ref())
            .and_then(|branches| {
                branches
                    .yes
                    .iter()
                    .rev()
                    .find(|id| repo.node(id).is_some_and(Node::is_step))
            })
            .cloned();

        match last_step {
            None => {
                return YesAttach::Empty { condition: current };
            }
            Some(id) if repo.node(&id).is_some_and(|node| node.kind == NodeKind::Condition) => {
                current = id;
            }
            Some(id) => {
                return YesAttach::Tail { action: id };
            }
        }
    }
}

/// Creates a fresh ghost terminator under an action inside a branch.
pub(crate) fn attach_ghost(
    repo: &mut Repository,
    ids: &mut IdAllocator,
    action_id: &NodeId,
    branch: BranchRef,
) -> NodeId {
    let ghost_id = ids.allocate(NodeKind::Ghost);
    let mut ghost = Node::chain(ghost_id.clone(), NodeKind::Ghost, Payload::default());
    ghost.parent = Some(action_id.clone());
    ghost.branch = Some(branch);
    repo.insert_node(ghost);
    if let Some(action) = repo.node_mut(action_id) {
        action.set_child(Some(ghost_id.clone()));
    }
    ghost_id
}

/// Creates a fresh placeholder as the sole content of a branch.
pub(crate) fn install_placeholder(
    repo: &mut Repository,
    ids: &mut IdAllocator,
    condition_id: &NodeId,
    side: BranchSide,
) -> NodeId {
    let placeholder_id = ids.allocate(NodeKind::Placeholder);
    let mut placeholder = Node::chain(
        placeholder_id.clone(),
        NodeKind::Placeholder,
        Payload::default(),
    );
    placeholder.parent = Some(condition_id.clone());
    placeholder.branch = Some(BranchRef::new(condition_id.clone(), side));
    repo.insert_node(placeholder);
    if let Some(list) = repo.branch_list_mut(&BranchRef::new(condition_id.clone(), side)) {
        list.clear();
        list.push(placeholder_id.clone());
    }
    placeholder_id
}

/// Stamps a container onto a run of top-level chain nodes (and any ghost
/// terminators hanging off them). `None` means the trunk.
pub(crate) fn set_container(repo: &mut Repository, chain: &[NodeId], container: Option<&BranchRef>) {
    for id in chain {
        if let Some(node) = repo.node_mut(id) {
            node.branch = container.cloned();
        }
        if let Some(ghost_id) = repo.ghost_child(id)
            && let Some(ghost) = repo.node_mut(&ghost_id)
        {
            ghost.branch = container.cloned();
        }
    }
}

fn index_in_list(repo: &Repository, branch: &BranchRef, id: &NodeId) -> Option<usize> {
    repo.branch_list(branch).iter().position(|member| member == id)
}

/// Lifts `chain` (a contiguous, head-first run of steps in one container)
/// out of the tree, leaving the nodes detached in the arena. The source is
/// repaired: the predecessor is relinked to whatever followed the chain, or
/// to a fresh end marker (trunk) or ghost (branch) when nothing did. An
/// emptied branch is left for the maintenance pass to re-placeholder.
///
/// Any ghost terminator on the chain tail is deleted; re-attachment creates
/// a fresh one when the destination needs it.
pub(crate) fn detach_chain(
    repo: &mut Repository,
    ids: &mut IdAllocator,
    chain: &[NodeId],
) -> Result<(), EditError> {
    let head_id = chain.first().ok_or(EditError::EmptyClipboard)?;
    let head = repo.require(head_id)?;
    let container = head.branch.clone();
    let pred_id = head
        .parent
        .clone()
        .ok_or_else(|| EditError::ReferenceNotFound { id: head_id.clone() })?;

    let tail_id = chain.last().expect("chain is non-empty").clone();
    let tail_kind = repo.require(&tail_id)?.kind;

    // What follows the chain: a real successor, the trunk end, a ghost, or
    // nothing at all.
    let mut successor: Option<NodeId> = None;
    let mut trailing_end: Option<NodeId> = None;
    if tail_kind != NodeKind::Condition
        && let Some(child_id) = repo.require(&tail_id)?.first_child().cloned()
    {
        match repo.node(&child_id).map(|node| node.kind) {
            Some(NodeKind::Ghost) => {
                repo.remove_node(&child_id);
            }
            Some(NodeKind::End) => trailing_end = Some(child_id),
            Some(_) => successor = Some(child_id),
            None => {}
        }
    }
    if let Some(tail) = repo.node_mut(&tail_id) {
        tail.set_child(None);
    }

    // Drop the chain from its branch list, if it was in one.
    if let Some(branch) = &container
        && let Some(list) = repo.branch_list_mut(branch)
    {
        list.retain(|member| !chain.contains(member));
    }

    // Reconnect the source around the hole.
    if let Some(successor_id) = &successor {
        if let Some(successor_node) = repo.node_mut(successor_id) {
            successor_node.parent = Some(pred_id.clone());
        }
        if let Some(pred) = repo.node_mut(&pred_id)
            && pred.kind != NodeKind::Condition
        {
            pred.set_child(Some(successor_id.clone()));
        }
    } else if container.is_none() {
        // Trunk: reconnect the predecessor to the end marker, creating one
        // if the detached tail was a fork (no marker existed).
        let end_id = match trailing_end {
            Some(end_id) => end_id,
            None => {
                let end_id = ids.allocate(NodeKind::End);
                repo.insert_node(Node::chain(end_id.clone(), NodeKind::End, Payload::default()));
                end_id
            }
        };
        if let Some(end) = repo.node_mut(&end_id) {
            end.parent = Some(pred_id.clone());
        }
        if let Some(pred) = repo.node_mut(&pred_id) {
            pred.set_child(Some(end_id));
        }
    } else if let Some(branch) = &container {
        let pred_kind = repo.node(&pred_id).map(|node| node.kind);
        if pred_kind == Some(NodeKind::Action) {
            if let Some(pred) = repo.node_mut(&pred_id) {
                pred.set_child(None);
            }
            attach_ghost(repo, ids, &pred_id, branch.clone());
        }
        // An emptied branch is re-placeholdered by the maintenance pass.
    }

    // Leave the chain fully detached.
    if let Some(head) = repo.node_mut(head_id) {
        head.parent = None;
    }
    set_container(repo, chain, None);
    Ok(())
}

/// Splices a detached chain in front of `before`, which must currently
/// hang off `parent`.
///
/// The chain nodes must already live in the arena, linked head-to-tail via
/// `children`, with no trailing marker. Marker targets are replaced rather
/// than displaced: an end or ghost `before` is deleted when a fork takes
/// its place, and a placeholder `before` is always consumed. When the chain
/// tail is a condition, the displaced downstream chain is absorbed into the
/// deepest `yes` attachment point, and the trunk end marker is removed
/// rather than duplicated into a branch.
pub(crate) fn attach_chain_before(
    repo: &mut Repository,
    ids: &mut IdAllocator,
    chain: &[NodeId],
    parent_id: &NodeId,
    before_id: &NodeId,
) -> Result<(), EditError> {
    let head_id = chain.first().ok_or(EditError::EmptyClipboard)?.clone();
    let tail_id = chain.last().expect("chain is non-empty").clone();
    let tail_is_fork = repo.require(&tail_id)?.kind == NodeKind::Condition;

    let before = repo.require(before_id)?;
    let before_kind = before.kind;
    let before_branch = before.branch.clone();

    match before_kind {
        NodeKind::End => {
            // Trunk attach in front of the end marker.
            if let Some(parent) = repo.node_mut(parent_id) {
                parent.set_child(Some(head_id.clone()));
            }
            if let Some(head) = repo.node_mut(&head_id) {
                head.parent = Some(parent_id.clone());
            }
            set_container(repo, chain, None);

            if tail_is_fork {
                // A fork has no single successor; the trunk loses its end
                // marker instead of pushing it into a branch.
                repo.remove_node(before_id);
            } else {
                if let Some(tail) = repo.node_mut(&tail_id) {
                    tail.set_child(Some(before_id.clone()));
                }
                if let Some(end) = repo.node_mut(before_id) {
                    end.parent = Some(tail_id.clone());
                }
            }
        }
        NodeKind::Ghost => {
            let branch = before_branch
                .or_else(|| repo.node(parent_id).and_then(|node| node.branch.clone()))
                .ok_or_else(|| EditError::ReferenceNotFound {
                    id: before_id.clone(),
                })?;
            repo.remove_node(before_id);

            if let Some(parent) = repo.node_mut(parent_id) {
                parent.set_child(Some(head_id.clone()));
            }
            if let Some(head) = repo.node_mut(&head_id) {
                head.parent = Some(parent_id.clone());
            }

            // The ghost's owner is the branch tail, so the chain extends
            // the end of the list.
            let insert_at = index_in_list(repo, &branch, parent_id)
                .map(|index| index + 1)
                .unwrap_or_else(|| repo.branch_list(&branch).len());
            if let Some(list) = repo.branch_list_mut(&branch) {
                for (offset, id) in chain.iter().enumerate() {
                    list.insert(insert_at + offset, id.clone());
                }
            }
            set_container(repo, chain, Some(&branch));

            if !tail_is_fork {
                attach_ghost(repo, ids, &tail_id, branch);
            }
        }
        NodeKind::Placeholder => {
            let branch = before_branch.ok_or_else(|| EditError::ReferenceNotFound {
                id: before_id.clone(),
            })?;
            repo.remove_node(before_id);

            if let Some(list) = repo.branch_list_mut(&branch) {
                list.retain(|member| member != before_id);
                for (offset, id) in chain.iter().enumerate() {
                    list.insert(offset, id.clone());
                }
            }
            if let Some(head) = repo.node_mut(&head_id) {
                head.parent = Some(branch.condition.clone());
            }
            set_container(repo, chain, Some(&branch));

            if !tail_is_fork {
                attach_ghost(repo, ids, &tail_id, branch);
            }
        }
        _ => {
            attach_before_step(repo, ids, chain, parent_id, before_id, tail_is_fork)?;
        }
    }
    Ok(())
}

/// Splice in front of a real step: the chain takes the step's slot, and the
/// step (with its whole downstream chain) either follows the chain tail or,
/// when the tail is a fork, is absorbed under its deepest `yes` attachment
/// point.
fn attach_before_step(
    repo: &mut Repository,
    ids: &mut IdAllocator,
    chain: &[NodeId],
    parent_id: &NodeId,
    before_id: &NodeId,
    tail_is_fork: bool,
) -> Result<(), EditError> {
    let head_id = chain.first().expect("chain is non-empty").clone();
    let tail_id = chain.last().expect("chain is non-empty").clone();
    let container = repo.require(before_id)?.branch.clone();

    // The chain takes the before-node's slot under its predecessor.
    if let Some(parent) = repo.node_mut(parent_id)
        && parent.kind != NodeKind::Condition
    {
        parent.set_child(Some(head_id.clone()));
    }
    if let Some(head) = repo.node_mut(&head_id) {
        head.parent = Some(parent_id.clone());
    }

    if !tail_is_fork {
        // Linear splice: before follows the chain tail.
        if let Some(branch) = &container {
            let insert_at = index_in_list(repo, branch, before_id).unwrap_or(0);
            if let Some(list) = repo.branch_list_mut(branch) {
                for (offset, id) in chain.iter().enumerate() {
                    list.insert(insert_at + offset, id.clone());
                }
            }
        }
        set_container(repo, chain, container.as_ref());

        if let Some(tail) = repo.node_mut(&tail_id) {
            tail.set_child(Some(before_id.clone()));
        }
        if let Some(before) = repo.node_mut(before_id) {
            before.parent = Some(tail_id.clone());
        }
        return Ok(());
    }

    // Fork splice: the chain tail is a condition, so the displaced
    // downstream chain moves underneath it.
    let downstream = repo.step_chain(before_id);
    let downstream_tail = downstream.last().cloned();

    // The downstream tail's trailing marker, before any relinking.
    let mut displaced_end: Option<NodeId> = None;
    if let Some(last) = &downstream_tail
        && let Some(child) = repo.node(last).and_then(|node| node.first_child()).cloned()
        && repo.node(&child).is_some_and(|node| node.kind == NodeKind::End)
    {
        displaced_end = Some(child);
    }

    // Container list: the chain replaces the downstream run.
    if let Some(branch) = &container {
        let position = index_in_list(repo, branch, before_id).unwrap_or(0);
        if let Some(list) = repo.branch_list_mut(branch) {
            list.retain(|member| !downstream.contains(member));
            for (offset, id) in chain.iter().enumerate() {
                list.insert(position + offset, id.clone());
            }
        }
    }
    set_container(repo, chain, container.as_ref());

    // Hang the displaced chain off the deepest yes attachment point.
    let target_branch = match resolve_yes_attach(repo, &tail_id) {
        YesAttach::Empty { condition } => {
            let branch = BranchRef::new(condition.clone(), BranchSide::Yes);
            // Consume any placeholder standing in for the empty branch.
            let stale: Vec<NodeId> = repo.branch_list(&branch).to_vec();
            for member in stale {
                if repo.node(&member).is_some_and(|node| node.kind == NodeKind::Placeholder) {
                    repo.remove_node(&member);
                }
            }
            if let Some(list) = repo.branch_list_mut(&branch) {
                list.clear();
                list.extend(downstream.iter().cloned());
            }
            if let Some(before) = repo.node_mut(before_id) {
                before.parent = Some(condition);
            }
            branch
        }
        YesAttach::Tail { action } => {
            let branch = repo
                .node(&action)
                .and_then(|node| node.branch.clone())
                .ok_or_else(|| EditError::ReferenceNotFound { id: action.clone() })?;
            if let Some(ghost_id) = repo.ghost_child(&action) {
                repo.remove_node(&ghost_id);
            }
            if let Some(action_node) = repo.node_mut(&action) {
                action_node.set_child(Some(before_id.clone()));
            }
            if let Some(before) = repo.node_mut(before_id) {
                before.parent = Some(action.clone());
            }
            if let Some(list) = repo.branch_list_mut(&branch) {
                list.extend(downstream.iter().cloned());
            }
            branch
        }
    };
    set_container(repo, &downstream, Some(&target_branch));

    // The displaced chain is no longer on the trunk: its trailing end
    // marker is removed (never duplicated into a branch) and the dangling
    // tail gets a ghost instead.
    if let Some(end_id) = displaced_end {
        repo.remove_node(&end_id);
        if let Some(last) = downstream_tail
            && repo.node(&last).is_some_and(|node| node.kind == NodeKind::Action)
        {
            if let Some(last_node) = repo.node_mut(&last) {
                last_node.set_child(None);
            }
            attach_ghost(repo, ids, &last, target_branch);
        }
    }
    Ok(())
}

//! Invariant maintenance: idempotent repair passes over the repository.
//!
//! Every structural edit finishes by running [`run`], which repairs
//! whatever the operation did not guarantee inline:
//!
//! - duplicate or stray placeholders are collapsed
//! - emptied branches get exactly one fresh placeholder
//! - dangling branch actions get a ghost continuation
//! - the trunk's end marker is recreated or retired as its tail changes
//! - parent back-pointers are rebuilt from the lists (derived data, never
//!   trusted blindly)
//! - unreferenced bookkeeping nodes are swept
//!
//! The passes are total functions over any possibly-inconsistent
//! repository: they never fail, and running them twice produces no further
//! change after the first run.

use crate::node::{BranchRef, BranchSide, IdAllocator, NodeId, NodeKind};
use crate::repository::Repository;
use crate::splice;
use std::collections::HashSet;
use tracing::trace;

/// Runs every maintenance pass, in order.
pub fn run(repo: &mut Repository, ids: &mut IdAllocator) {
    dedupe_placeholders(repo);
    ensure_placeholders(repo, ids);
    ensure_trunk_end(repo, ids);
    rebuild_backpointers(repo);
    sweep_orphans(repo);
}

fn condition_ids(repo: &Repository) -> Vec<NodeId> {
    repo.iter()
        .filter(|node| node.kind == NodeKind::Condition)
        .map(|node| node.id.clone())
        .collect()
}

/// Collapses branch lists to their canonical content: the real steps when
/// any exist (every placeholder deleted), otherwise the first placeholder.
pub fn dedupe_placeholders(repo: &mut Repository) {
    for condition_id in condition_ids(repo) {
        for side in BranchSide::BOTH {
            let branch = BranchRef::new(condition_id.clone(), side);
            let list = repo.branch_list(&branch).to_vec();

            let reals: Vec<NodeId> = list
                .iter()
                .filter(|id| repo.node(id).is_some_and(|node| node.is_step()))
                .cloned()
                .collect();
            let placeholders: Vec<NodeId> = list
                .iter()
                .filter(|id| {
                    repo.node(id)
                        .is_some_and(|node| node.kind == NodeKind::Placeholder)
                })
                .cloned()
                .collect();

            if !reals.is_empty() {
                if placeholders.is_empty() && list == reals {
                    continue;
                }
                trace!(condition = %condition_id, %side, "collapsing branch to real steps");
                for placeholder in &placeholders {
                    repo.remove_node(placeholder);
                }
                if let Some(slot) = repo.branch_list_mut(&branch) {
                    *slot = reals.clone();
                }
                relink_branch_chain(repo, &branch, &reals);
            } else if placeholders.len() != list.len() || placeholders.len() > 1 {
                trace!(condition = %condition_id, %side, "reducing branch to one placeholder");
                let keep = placeholders.first().cloned();
                for placeholder in placeholders.iter().skip(1) {
                    repo.remove_node(placeholder);
                }
                let kept: Vec<NodeId> = keep.iter().cloned().collect();
                if let Some(slot) = repo.branch_list_mut(&branch) {
                    *slot = kept.clone();
                }
                if let Some(kept_id) = keep
                    && let Some(node) = repo.node_mut(&kept_id)
                {
                    node.parent = Some(condition_id.clone());
                    node.branch = Some(branch.clone());
                }
            }
        }
    }
}

fn relink_branch_chain(repo: &mut Repository, branch: &BranchRef, members: &[NodeId]) {
    let mut previous = branch.condition.clone();
    for (index, member_id) in members.iter().enumerate() {
        if index > 0
            && let Some(prev_node) = repo.node_mut(&previous)
            && prev_node.kind != NodeKind::Condition
            && prev_node.first_child() != Some(member_id)
        {
            prev_node.set_child(Some(member_id.clone()));
        }
        if let Some(member) = repo.node_mut(member_id) {
            member.parent = Some(previous.clone());
            member.branch = Some(branch.clone());
        }
        previous = member_id.clone();
    }
}

/// Restores the bookkeeping every branch and branch action requires: an
/// empty branch gets exactly one fresh placeholder, and an action inside a
/// branch with no continuation gets a ghost.
pub fn ensure_placeholders(repo: &mut Repository, ids: &mut IdAllocator) {
    for condition_id in condition_ids(repo) {
        for side in BranchSide::BOTH {
            let branch = BranchRef::new(condition_id.clone(), side);
            let list = repo.branch_list(&branch).to_vec();

            let has_real = list
                .iter()
                .any(|id| repo.node(id).is_some_and(|node| node.is_step()));
            if has_real {
                continue;
            }

            let placeholder = list.iter().find(|id| {
                repo.node(id)
                    .is_some_and(|node| node.kind == NodeKind::Placeholder)
            });
            if let Some(placeholder_id) = placeholder
                && list.len() == 1
            {
                // Already exactly one placeholder; fix its links in place.
                let placeholder_id = placeholder_id.clone();
                if let Some(node) = repo.node_mut(&placeholder_id) {
                    node.parent = Some(condition_id.clone());
                    node.branch = Some(branch.clone());
                }
                continue;
            }

            trace!(condition = %condition_id, %side, "installing placeholder in empty branch");
            // Strip stray bookkeeping before installing the placeholder.
            for stray in &list {
                if repo
                    .node(stray)
                    .is_some_and(|node| node.kind != NodeKind::Placeholder)
                {
                    repo.remove_node(stray);
                }
            }
            splice::install_placeholder(repo, ids, &condition_id, side);
        }
    }

    // Branch actions with no (or a dangling) continuation get a ghost.
    let dangling: Vec<(NodeId, BranchRef)> = repo
        .iter()
        .filter(|node| node.kind == NodeKind::Action)
        .filter_map(|node| {
            let branch = node.branch.clone()?;
            let needs_ghost = match node.first_child() {
                None => true,
                Some(child) => !repo.contains(child),
            };
            needs_ghost.then(|| (node.id.clone(), branch))
        })
        .collect();
    for (action_id, branch) in dangling {
        trace!(action = %action_id, "attaching ghost to dangling branch action");
        if let Some(action) = repo.node_mut(&action_id) {
            action.set_child(None);
        }
        splice::attach_ghost(repo, ids, &action_id, branch);
    }
}

/// Keeps the trunk terminated by exactly one end marker, unless its tail is
/// a fork (which has no single successor and therefore no marker).
pub fn ensure_trunk_end(repo: &mut Repository, ids: &mut IdAllocator) {
    let trunk = repo.trunk();
    let Some(last_id) = trunk.last().cloned() else {
        return;
    };
    let Some(last_kind) = repo.node(&last_id).map(|node| node.kind) else {
        return;
    };

    let stray_ends: Vec<NodeId> = repo
        .iter()
        .filter(|node| node.kind == NodeKind::End && node.id != last_id)
        .map(|node| node.id.clone())
        .collect();

    match last_kind {
        NodeKind::End => {
            for end_id in stray_ends {
                trace!(end = %end_id, "removing stray end marker");
                repo.remove_node(&end_id);
            }
        }
        NodeKind::Condition => {
            for end_id in stray_ends {
                trace!(end = %end_id, "removing end marker behind forking trunk tail");
                repo.remove_node(&end_id);
            }
        }
        NodeKind::Trigger | NodeKind::Action => {
            for end_id in stray_ends {
                repo.remove_node(&end_id);
            }
            trace!(tail = %last_id, "recreating trunk end marker");
            let end_id = ids.allocate(NodeKind::End);
            let mut end = crate::node::Node::chain(
                end_id.clone(),
                NodeKind::End,
                crate::node::Payload::default(),
            );
            end.parent = Some(last_id.clone());
            repo.insert_node(end);
            if let Some(last) = repo.node_mut(&last_id) {
                last.set_child(Some(end_id));
            }
        }
        _ => {}
    }
}

/// Rebuilds parent back-pointers from the `children` and branch lists.
/// Back-pointers are derived data; the lists are authoritative.
pub fn rebuild_backpointers(repo: &mut Repository) {
    let mut expected: Vec<(NodeId, NodeId)> = Vec::new();
    for node in repo.iter() {
        for child in &node.children {
            expected.push((child.clone(), node.id.clone()));
        }
        if let Some(branches) = &node.branches {
            for side in BranchSide::BOTH {
                let mut previous = node.id.clone();
                for member in branches.list(side) {
                    expected.push((member.clone(), previous.clone()));
                    previous = member.clone();
                }
            }
        }
    }

    for (child_id, parent_id) in expected {
        if let Some(child) = repo.node_mut(&child_id)
            && child.parent.as_ref() != Some(&parent_id)
        {
            trace!(node = %child_id, parent = %parent_id, "repairing parent back-pointer");
            child.parent = Some(parent_id);
        }
    }

    let rootless: Vec<NodeId> = repo
        .iter()
        .filter(|node| {
            matches!(node.kind, NodeKind::Trigger | NodeKind::StickyNote)
                && node.parent.is_some()
        })
        .map(|node| node.id.clone())
        .collect();
    for id in rootless {
        if let Some(node) = repo.node_mut(&id) {
            node.parent = None;
        }
    }
}

/// Deletes ghost and placeholder nodes no list references.
pub fn sweep_orphans(repo: &mut Repository) {
    let referenced: HashSet<NodeId> = repo
        .iter()
        .flat_map(|node| {
            node.children.iter().cloned().chain(
                node.branches
                    .iter()
                    .flat_map(|branches| branches.yes.iter().chain(branches.no.iter()).cloned()),
            )
        })
        .collect();

    let orphans: Vec<NodeId> = repo
        .iter()
        .filter(|node| matches!(node.kind, NodeKind::Ghost | NodeKind::Placeholder))
        .filter(|node| !referenced.contains(&node.id))
        .map(|node| node.id.clone())
        .collect();
    for orphan in orphans {
        trace!(node = %orphan, "sweeping orphaned bookkeeping node");
        repo.remove_node(&orphan);
    }
}

//! Workflow document types.
//!
//! A workflow is a named automation that consists of:
//! - Metadata (name, description, enabled flag, timestamps)
//! - An editor over the node repository (the graph itself)
//!
//! Persistence is an external concern: the document hands the full node
//! map out and accepts one back, opaque to the storage layer.

use crate::editor::GraphEditor;
use crate::node::{Node, NodeId, Payload};
use chrono::{DateTime, Utc};
use flowline_core::WorkflowId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata for a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Whether this workflow is enabled.
    pub enabled: bool,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete workflow document: metadata plus the editable graph.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// The structural-edit handle over the node repository.
    pub editor: GraphEditor,
}

impl Workflow {
    /// Creates a new workflow with a freshly seeded graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata::new(name),
            editor: GraphEditor::new(),
        }
    }

    /// Creates a workflow whose seeded trigger carries the given payload.
    #[must_use]
    pub fn with_trigger(name: impl Into<String>, trigger_payload: Payload) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata::new(name),
            editor: GraphEditor::with_trigger(trigger_payload),
        }
    }

    /// Restores a workflow from a persisted node map. The invariant
    /// maintainer runs on load and the id allocator is rebuilt from the
    /// map.
    #[must_use]
    pub fn from_nodes(
        id: WorkflowId,
        metadata: WorkflowMetadata,
        nodes: HashMap<NodeId, Node>,
    ) -> Self {
        Self {
            id,
            metadata,
            editor: GraphEditor::from_nodes(nodes),
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns whether the workflow is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.metadata.enabled
    }

    /// Enables the workflow.
    pub fn enable(&mut self) {
        self.metadata.enabled = true;
        self.touch();
    }

    /// Disables the workflow.
    pub fn disable(&mut self) {
        self.metadata.enabled = false;
        self.touch();
    }

    /// Returns the editor for a round of structural edits, bumping the
    /// updated-at timestamp.
    pub fn edit(&mut self) -> &mut GraphEditor {
        self.touch();
        &mut self.editor
    }

    /// Marks the workflow as updated (bumps the timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}

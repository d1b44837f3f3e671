//! Node template records from the external catalog.
//!
//! The catalog of selectable templates (labels, icons, descriptions, the
//! per-type config forms) lives outside this engine; a template is consumed
//! read-only as the payload seed when the user inserts a step. The engine
//! copies fields without validating catalog contents.

use crate::node::{NodeKind, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A selectable node template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Catalog-assigned template identifier (e.g. `"send-email"`).
    pub id: String,
    /// The node kind this template creates.
    pub kind: NodeKind,
    /// Label shown before the user renames the step.
    pub default_label: String,
    /// Payload seed; merged into the new node's opaque data.
    #[serde(default)]
    pub default_payload: serde_json::Map<String, JsonValue>,
    /// Whether steps from this template may only sit immediately before
    /// the trunk end marker.
    #[serde(default)]
    pub is_terminal: bool,
}

impl NodeTemplate {
    /// Creates a template with an empty payload seed.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: NodeKind, default_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            default_label: default_label.into(),
            default_payload: serde_json::Map::new(),
            is_terminal: false,
        }
    }

    /// Marks the template as terminal-only.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    /// Builds the payload seed for a node created from this template.
    #[must_use]
    pub fn seed_payload(&self) -> Payload {
        Payload {
            label: self.default_label.clone(),
            icon: None,
            is_configured: false,
            is_terminal: self.is_terminal,
            data: self.default_payload.clone(),
        }
    }
}

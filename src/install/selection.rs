//! Explicit selection decisions.
//!
//! The option tree stays read-only; whether an `option` is installed is
//! decided here. An explicit decision wins; otherwise a node is selected
//! when it carries `install="true"` or `required="true"`.

use std::collections::HashMap;

use super::tree::{NodeId, OptionNode, OptionTree};
use crate::condition::BooleanRegistry;

/// Map from option node to install decision.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    decisions: HashMap<NodeId, bool>,
}

impl Selection {
    /// Creates an empty selection; every node falls back to its attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an explicit decision.
    pub fn set(&mut self, id: NodeId, selected: bool) -> &mut Self {
        self.decisions.insert(id, selected);
        self
    }

    /// Marks a node for installation.
    pub fn select(&mut self, id: NodeId) -> &mut Self {
        self.set(id, true)
    }

    /// Marks a node as not installed.
    pub fn deselect(&mut self, id: NodeId) -> &mut Self {
        self.set(id, false)
    }

    /// Returns the explicit decision for a node, if any.
    pub fn decision(&self, id: NodeId) -> Option<bool> {
        self.decisions.get(&id).copied()
    }

    /// Returns whether a node is selected.
    pub fn is_selected(&self, node: OptionNode<'_>) -> bool {
        match self.decision(node.id()) {
            Some(decision) => decision,
            None => node.flag("install") || node.flag("required"),
        }
    }

    /// Deselects every node whose `if` condition is false or whose
    /// `unless` condition is true.
    ///
    /// `required` nodes are left alone. Returns the number of nodes
    /// deselected.
    pub fn apply_conditions(&mut self, tree: &OptionTree, booleans: &BooleanRegistry) -> usize {
        let mut deselected = 0;
        let mut stack = vec![tree.node(tree.root())];
        while let Some(node) = stack.pop() {
            stack.extend(node.children());
            if node.flag("required") {
                continue;
            }
            let passes_if = node.attr("if").is_none_or(|c| booleans.eval(c));
            let passes_unless = node.attr("unless").is_none_or(|c| !booleans.eval(c));
            if !(passes_if && passes_unless) {
                log::debug!("Option '{}' disabled by its condition", node.label());
                self.deselect(node.id());
                deselected += 1;
            }
        }
        deselected
    }
}

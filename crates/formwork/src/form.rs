//! Arena view over a control-definition tree.
//!
//! Form nodes are data-independent: they describe what to render and how.
//! The mutable definition surface for editing tools is
//! [`FormTree::replace_definition`], which swaps a subtree and reports the
//! node ids that ceased to exist so their per-pair state can be torn down.

use std::sync::Arc;

use crate::definition::ControlDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormId(pub(crate) u32);

struct FormNodeData {
    definition: Arc<ControlDefinition>,
    parent: Option<FormId>,
    children: Vec<FormId>,
    alive: bool,
}

pub struct FormTree {
    nodes: Vec<FormNodeData>,
}

impl FormTree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Load a definition tree; children become form nodes recursively.
    pub fn load(&mut self, definition: ControlDefinition) -> FormId {
        self.insert(definition, None)
    }

    fn insert(&mut self, definition: ControlDefinition, parent: Option<FormId>) -> FormId {
        let id = FormId(self.nodes.len() as u32);
        self.nodes.push(FormNodeData {
            definition: Arc::new(ControlDefinition { children: Vec::new(), ..definition.clone() }),
            parent,
            children: Vec::new(),
            alive: true,
        });
        let children: Vec<FormId> = definition
            .children
            .into_iter()
            .map(|child| self.insert(child, Some(id)))
            .collect();
        self.nodes[id.0 as usize].children = children;
        id
    }

    pub fn definition(&self, node: FormId) -> Arc<ControlDefinition> {
        self.nodes[node.0 as usize].definition.clone()
    }

    pub fn parent(&self, node: FormId) -> Option<FormId> {
        self.nodes[node.0 as usize].parent
    }

    pub fn children(&self, node: FormId) -> Vec<FormId> {
        self.nodes[node.0 as usize].children.clone()
    }

    pub fn is_alive(&self, node: FormId) -> bool {
        self.nodes[node.0 as usize].alive
    }

    /// Replace a node's definition (and descendants) in place. The node
    /// keeps its id; all previous descendants are retired and returned
    /// together with the node itself, since any computed state keyed on the
    /// old definition is stale.
    pub fn replace_definition(
        &mut self,
        node: FormId,
        definition: ControlDefinition,
    ) -> Vec<FormId> {
        let mut retired = Vec::new();
        let old_children = std::mem::take(&mut self.nodes[node.0 as usize].children);
        for child in old_children {
            self.retire(child, &mut retired);
        }
        self.nodes[node.0 as usize].definition =
            Arc::new(ControlDefinition { children: Vec::new(), ..definition.clone() });
        let children: Vec<FormId> = definition
            .children
            .into_iter()
            .map(|child| self.insert(child, Some(node)))
            .collect();
        self.nodes[node.0 as usize].children = children;
        retired.push(node);
        retired
    }

    fn retire(&mut self, node: FormId, retired: &mut Vec<FormId>) {
        let children = std::mem::take(&mut self.nodes[node.0 as usize].children);
        for child in children {
            self.retire(child, retired);
        }
        self.nodes[node.0 as usize].alive = false;
        retired.push(node);
    }
}

impl Default for FormTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: serde_json::Value) -> ControlDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn children_are_derived_from_the_definition() {
        let mut tree = FormTree::new();
        let root = tree.load(definition(json!({
            "title": "Root",
            "children": [
                { "title": "A" },
                { "title": "B", "children": [{ "title": "B1" }] },
            ],
        })));
        let children = tree.children(root);
        assert_eq!(children.len(), 2);
        assert_eq!(tree.definition(children[0]).title.as_deref(), Some("A"));
        assert_eq!(tree.children(children[1]).len(), 1);
        // Node-local definitions carry no child duplicates.
        assert!(tree.definition(root).children.is_empty());
    }

    #[test]
    fn replace_definition_retires_old_subtree() {
        let mut tree = FormTree::new();
        let root = tree.load(definition(json!({
            "children": [{ "title": "Old" }],
        })));
        let old_child = tree.children(root)[0];

        let retired = tree.replace_definition(
            root,
            definition(json!({ "children": [{ "title": "New" }] })),
        );
        assert!(retired.contains(&old_child));
        assert!(retired.contains(&root));
        assert!(!tree.is_alive(old_child));
        assert!(tree.is_alive(root));
        let new_child = tree.children(root)[0];
        assert_eq!(tree.definition(new_child).title.as_deref(), Some("New"));
    }
}

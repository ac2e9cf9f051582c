//! Arena-backed schema tree with total path resolution.
//!
//! Schema nodes are index handles into a `SchemaTree`. Children are
//! materialized lazily and memoized by `(parent, name)`, so repeated lookups
//! return the same handle. Compound fields carrying a `schemaRef` proxy all
//! child enumeration to the referenced shared schema, which makes two
//! structurally distinct nodes logically identical for navigation.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::definition::{FieldDecl, FieldType, SchemaDocument};

/// Index handle of a node in a [`SchemaTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(pub(crate) u32);

struct SchemaNodeData {
    decl: Arc<FieldDecl>,
    parent: Option<SchemaId>,
    /// Unresolvable name sentinel, distinct from a real `Any` field.
    missing: bool,
}

/// Read-only structural view over a field declaration tree.
pub struct SchemaTree {
    nodes: Vec<SchemaNodeData>,
    children: FxHashMap<(SchemaId, Arc<str>), SchemaId>,
    shared: FxHashMap<String, Arc<FieldDecl>>,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            children: FxHashMap::default(),
            shared: FxHashMap::default(),
        }
    }

    /// Register the shared schemas of a document and return the root node of
    /// its field list (a synthetic compound holding the top-level fields).
    pub fn load_document(&mut self, document: SchemaDocument) -> SchemaId {
        for schema in document.schemas {
            self.shared.insert(schema.field.clone(), Arc::new(schema));
        }
        let root = FieldDecl {
            field_type: FieldType::Compound,
            children: document.fields,
            ..FieldDecl::default()
        };
        self.insert(Arc::new(root), None, false)
    }

    /// Root node for a single standalone declaration.
    pub fn load_root(&mut self, decl: FieldDecl) -> SchemaId {
        self.insert(Arc::new(decl), None, false)
    }

    pub fn register_shared(&mut self, decl: FieldDecl) {
        self.shared.insert(decl.field.clone(), Arc::new(decl));
    }

    fn insert(&mut self, decl: Arc<FieldDecl>, parent: Option<SchemaId>, missing: bool) -> SchemaId {
        let id = SchemaId(self.nodes.len() as u32);
        self.nodes.push(SchemaNodeData { decl, parent, missing });
        id
    }

    pub fn decl(&self, node: SchemaId) -> &Arc<FieldDecl> {
        &self.nodes[node.0 as usize].decl
    }

    pub fn parent(&self, node: SchemaId) -> Option<SchemaId> {
        self.nodes[node.0 as usize].parent
    }

    /// Whether this node is the unresolved-name sentinel.
    pub fn is_missing(&self, node: SchemaId) -> bool {
        self.nodes[node.0 as usize].missing
    }

    /// The declarations a node's children are drawn from. A `schemaRef`
    /// redirects to the referenced schema's children; an unknown reference
    /// behaves as an empty compound.
    fn effective_children(&self, node: SchemaId) -> Vec<Arc<FieldDecl>> {
        let decl = &self.nodes[node.0 as usize].decl;
        if let Some(reference) = &decl.schema_ref {
            match self.shared.get(reference) {
                Some(shared) => shared.children.iter().cloned().map(Arc::new).collect(),
                None => Vec::new(),
            }
        } else {
            decl.children.iter().cloned().map(Arc::new).collect()
        }
    }

    /// Named child lookup. Unresolved names yield a memoized missing-field
    /// sentinel (type `Any`), never an error.
    pub fn child_by_name(&mut self, node: SchemaId, name: &str) -> SchemaId {
        let key: Arc<str> = Arc::from(name);
        if let Some(&child) = self.children.get(&(node, key.clone())) {
            return child;
        }
        let found = self
            .effective_children(node)
            .into_iter()
            .find(|child| child.field == name);
        let child = match found {
            Some(decl) => self.insert(decl, Some(node), false),
            None => {
                log::debug!("schema child '{name}' not found; using missing sentinel");
                self.insert(Arc::new(FieldDecl::missing(name)), Some(node), true)
            }
        };
        self.children.insert((node, key), child);
        child
    }

    /// All children of a node, materialized.
    pub fn children(&mut self, node: SchemaId) -> Vec<SchemaId> {
        let names: Vec<String> = self
            .effective_children(node)
            .iter()
            .map(|decl| decl.field.clone())
            .collect();
        names
            .iter()
            .map(|name| self.child_by_name(node, name))
            .collect()
    }

    /// Resolve one path segment: `"."` is self, `".."` the parent (the root
    /// resolves to itself), anything else a named child.
    pub fn resolve_segment(&mut self, node: SchemaId, segment: &str) -> SchemaId {
        match segment {
            "" | "." => node,
            ".." => self.parent(node).unwrap_or(node),
            name => self.child_by_name(node, name),
        }
    }

    /// Resolve a `/`-delimited path by iterative single-segment resolution.
    /// An unresolved intermediate segment yields the sentinel and resolution
    /// continues against it, so resolution never fails mid-path.
    pub fn resolve_path(&mut self, node: SchemaId, path: &str) -> SchemaId {
        path.split('/')
            .fold(node, |current, segment| self.resolve_segment(current, segment))
    }
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::new()
    }
}

//! Schema-bound data nodes over a JSON document.
//!
//! A `DataTree` owns two documents: the user data and a side meta document
//! for fields flagged as UI bookkeeping rather than user data. Bindings
//! (`DataId`) pair a schema node with a path into one of the documents and
//! carry a stable ULID identity; child and element lookups are memoized so
//! the same arguments always return the same binding.
//!
//! Reads go through reactive cells interned per path, which is what gives
//! computations leaf-exact dependencies: a write invalidates the written
//! path, its ancestors (their composite value contains it) and its
//! descendants (a replaced subtree changes their leaves), never siblings.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use ulid::Ulid;

use crate::reactive::{CellId, Runtime};
use crate::schema::{SchemaId, SchemaTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataId(pub(crate) u32);

/// One step into a document: object key or collection element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Seg {
    Key(Arc<str>),
    Index(usize),
}

/// Path into the user document (`meta == false`) or the side meta document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DataPath {
    pub meta: bool,
    pub segs: Vec<Seg>,
}

impl DataPath {
    fn child(&self, key: &Arc<str>, meta: bool) -> DataPath {
        let mut segs = self.segs.clone();
        segs.push(Seg::Key(key.clone()));
        DataPath { meta: self.meta || meta, segs }
    }

    fn element(&self, index: usize) -> DataPath {
        let mut segs = self.segs.clone();
        segs.push(Seg::Index(index));
        DataPath { meta: self.meta, segs }
    }

    /// Drop trailing element indices, then one key. Used for `..`
    /// navigation: the parent of an element's field is the field owning
    /// the collection, not the element itself.
    fn parent(&self) -> DataPath {
        let mut segs = self.segs.clone();
        while matches!(segs.last(), Some(Seg::Index(_))) {
            segs.pop();
        }
        segs.pop();
        DataPath { meta: self.meta, segs }
    }

    /// True when `self` is a prefix of `other` (or equal).
    fn is_prefix_of(&self, other: &DataPath) -> bool {
        self.meta == other.meta
            && self.segs.len() <= other.segs.len()
            && self.segs.iter().zip(&other.segs).all(|(a, b)| a == b)
    }

    /// Related paths see each other's writes: equal, ancestor or
    /// descendant. Siblings are unrelated.
    fn related(&self, other: &DataPath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:", if self.meta { "meta" } else { "data" })?;
        for (position, seg) in self.segs.iter().enumerate() {
            if position > 0 {
                write!(f, "/")?;
            }
            match seg {
                Seg::Key(key) => write!(f, "{key}")?,
                Seg::Index(index) => write!(f, "{index}")?,
            }
        }
        Ok(())
    }
}

struct DataNodeData {
    id: Arc<str>,
    schema: SchemaId,
    path: DataPath,
    parent: Option<DataId>,
    element_index: Option<usize>,
    alive: bool,
}

pub struct DataTree {
    document: Value,
    meta_document: Value,
    nodes: Vec<DataNodeData>,
    cells: FxHashMap<DataPath, CellId>,
    children: FxHashMap<(DataId, SchemaId), DataId>,
    elements: FxHashMap<(DataId, usize), DataId>,
}

impl DataTree {
    pub fn new() -> Self {
        Self {
            document: Value::Null,
            meta_document: Value::Object(serde_json::Map::new()),
            nodes: Vec::new(),
            cells: FxHashMap::default(),
            children: FxHashMap::default(),
            elements: FxHashMap::default(),
        }
    }

    /// Bind the root of `document` to a schema node.
    pub fn bind_root(&mut self, schema: SchemaId, document: Value) -> DataId {
        self.document = document;
        self.insert_node(schema, DataPath::default(), None, None)
    }

    fn insert_node(
        &mut self,
        schema: SchemaId,
        path: DataPath,
        parent: Option<DataId>,
        element_index: Option<usize>,
    ) -> DataId {
        let id = DataId(self.nodes.len() as u32);
        self.nodes.push(DataNodeData {
            id: Arc::from(Ulid::new().to_string()),
            schema,
            path,
            parent,
            element_index,
            alive: true,
        });
        id
    }

    // --- Node accessors ---

    /// Stable identity token of a binding; renderers key list
    /// reconciliation on this.
    pub fn node_id(&self, node: DataId) -> Arc<str> {
        self.nodes[node.0 as usize].id.clone()
    }

    pub fn schema_of(&self, node: DataId) -> SchemaId {
        self.nodes[node.0 as usize].schema
    }

    pub fn parent_of(&self, node: DataId) -> Option<DataId> {
        self.nodes[node.0 as usize].parent
    }

    pub fn element_index(&self, node: DataId) -> Option<usize> {
        self.nodes[node.0 as usize].element_index
    }

    pub fn path_of(&self, node: DataId) -> DataPath {
        self.nodes[node.0 as usize].path.clone()
    }

    pub fn is_alive(&self, node: DataId) -> bool {
        self.nodes[node.0 as usize].alive
    }

    // --- Descent ---

    /// Child binding for a schema child. Memoized: the same
    /// `(parent, schema)` pair always yields a binding with the same id.
    /// Fields flagged `meta` bind into the side meta document.
    pub fn child(&mut self, schema: &SchemaTree, parent: DataId, child_schema: SchemaId) -> DataId {
        if let Some(&existing) = self.children.get(&(parent, child_schema)) {
            return existing;
        }
        let decl = schema.decl(child_schema);
        let key: Arc<str> = Arc::from(decl.field.as_str());
        let path = self.nodes[parent.0 as usize].path.child(&key, decl.meta);
        let node = self.insert_node(child_schema, path, Some(parent), None);
        self.children.insert((parent, child_schema), node);
        node
    }

    /// Element binding of a collection-typed parent. Memoized per index.
    pub fn element(&mut self, parent: DataId, index: usize) -> DataId {
        if let Some(&existing) = self.elements.get(&(parent, index)) {
            return existing;
        }
        let schema = self.nodes[parent.0 as usize].schema;
        let path = self.nodes[parent.0 as usize].path.element(index);
        let node = self.insert_node(schema, path, Some(parent), Some(index));
        self.elements.insert((parent, index), node);
        node
    }

    /// Resolve a `/`-delimited field reference from `node`, returning the
    /// schema node it lands on and the data path to read. Total: missing
    /// segments resolve to the schema sentinel and a path that reads as
    /// absent.
    pub fn resolve_field(
        &mut self,
        schema: &mut SchemaTree,
        node: DataId,
        reference: &str,
    ) -> (SchemaId, DataPath) {
        let mut schema_node = self.nodes[node.0 as usize].schema;
        let mut path = self.nodes[node.0 as usize].path.clone();
        for segment in reference.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    schema_node = schema.resolve_segment(schema_node, "..");
                    path = path.parent();
                }
                name => {
                    schema_node = schema.child_by_name(schema_node, name);
                    let decl = schema.decl(schema_node);
                    let key: Arc<str> = Arc::from(name);
                    path = path.child(&key, decl.meta);
                }
            }
        }
        (schema_node, path)
    }

    // --- Document access ---

    fn document_for(&self, path: &DataPath) -> &Value {
        if path.meta { &self.meta_document } else { &self.document }
    }

    fn lookup<'doc>(document: &'doc Value, segs: &[Seg]) -> Option<&'doc Value> {
        let mut current = document;
        for seg in segs {
            current = match seg {
                Seg::Key(key) => current.as_object()?.get(key.as_ref())?,
                Seg::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    /// Current value at a path, `None` when absent. No dependency
    /// registration; see [`DataTree::read`].
    pub fn peek(&self, path: &DataPath) -> Option<Value> {
        Self::lookup(self.document_for(path), &path.segs).cloned()
    }

    fn cell_for(&mut self, rt: &mut Runtime, path: &DataPath) -> CellId {
        if let Some(&cell) = self.cells.get(path) {
            return cell;
        }
        let initial = self.peek(path).unwrap_or(Value::Null);
        let cell = rt.alloc_cell(initial);
        self.cells.insert(path.clone(), cell);
        cell
    }

    /// Tracked read: registers a dependency of the running computation on
    /// exactly this path.
    pub fn read(&mut self, rt: &mut Runtime, path: &DataPath) -> Value {
        let cell = self.cell_for(rt, path);
        rt.track(cell);
        self.peek(path).unwrap_or(Value::Null)
    }

    /// Tracked read distinguishing an absent value from a stored null.
    pub fn read_opt(&mut self, rt: &mut Runtime, path: &DataPath) -> Option<Value> {
        let cell = self.cell_for(rt, path);
        rt.track(cell);
        self.peek(path)
    }

    /// Tracked read of a binding's own value.
    pub fn read_node(&mut self, rt: &mut Runtime, node: DataId) -> Value {
        let path = self.path_of(node);
        self.read(rt, &path)
    }

    /// Tracked element count of a collection binding.
    pub fn element_count(&mut self, rt: &mut Runtime, node: DataId) -> usize {
        let path = self.path_of(node);
        match self.read(rt, &path) {
            Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    fn ensure<'doc>(document: &'doc mut Value, segs: &[Seg]) -> &'doc mut Value {
        let mut current = document;
        for seg in segs {
            match seg {
                Seg::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(serde_json::Map::new());
                    }
                    current = current
                        .as_object_mut()
                        .unwrap()
                        .entry(key.to_string())
                        .or_insert(Value::Null);
                }
                Seg::Index(index) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let items = current.as_array_mut().unwrap();
                    if items.len() <= *index {
                        items.resize(index + 1, Value::Null);
                    }
                    current = &mut items[*index];
                }
            }
        }
        current
    }

    /// Write a value, then refresh every interned cell related to the
    /// written path. Ancestors change because their composite contains the
    /// write; descendants change because the written subtree replaced
    /// theirs. Sibling paths are untouched, which is what keeps
    /// recomputation minimal.
    pub fn write(&mut self, rt: &mut Runtime, path: &DataPath, value: Value) {
        let document = if path.meta { &mut self.meta_document } else { &mut self.document };
        *Self::ensure(document, &path.segs) = value;
        self.refresh_related(rt, path);
    }

    pub fn write_node(&mut self, rt: &mut Runtime, node: DataId, value: Value) {
        let path = self.path_of(node);
        self.write(rt, &path, value);
    }

    /// Clear a path back to absent-as-null.
    pub fn clear(&mut self, rt: &mut Runtime, path: &DataPath) {
        self.write(rt, path, Value::Null);
    }

    fn refresh_related(&mut self, rt: &mut Runtime, changed: &DataPath) {
        let related: Vec<(DataPath, CellId)> = self
            .cells
            .iter()
            .filter(|(path, _)| changed.related(path))
            .map(|(path, &cell)| (path.clone(), cell))
            .collect();
        for (path, cell) in related {
            let value = self.peek(&path).unwrap_or(Value::Null);
            rt.write(cell, value);
        }
    }

    // --- Collection mutation ---

    /// Append an element to a collection binding; returns the new element's
    /// binding.
    pub fn push_element(&mut self, rt: &mut Runtime, parent: DataId, value: Value) -> DataId {
        let path = self.path_of(parent);
        let document = if path.meta { &mut self.meta_document } else { &mut self.document };
        let slot = Self::ensure(document, &path.segs);
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        let items = slot.as_array_mut().unwrap();
        items.push(value);
        let index = items.len() - 1;
        self.refresh_related(rt, &path);
        self.element(parent, index)
    }

    /// Remove the element at `index`. Sibling bindings above it shift down
    /// one position keeping their identity (identity follows the element,
    /// not the slot). Returns the removed binding and every live descendant
    /// binding under it, so owners can tear down their state.
    pub fn remove_element(
        &mut self,
        rt: &mut Runtime,
        parent: DataId,
        index: usize,
    ) -> Vec<DataId> {
        let parent_path = self.path_of(parent);
        {
            let document =
                if parent_path.meta { &mut self.meta_document } else { &mut self.document };
            let slot = Self::ensure(document, &parent_path.segs);
            match slot.as_array_mut() {
                Some(items) if index < items.len() => {
                    items.remove(index);
                }
                _ => return Vec::new(),
            }
        }

        let removed_path = parent_path.element(index);
        let removed: Vec<DataId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.alive && removed_path.is_prefix_of(&node.path))
            .map(|(position, _)| DataId(position as u32))
            .collect();
        for &node in &removed {
            self.nodes[node.0 as usize].alive = false;
        }
        let nodes = &self.nodes;
        self.children.retain(|(node, _), _| nodes[node.0 as usize].alive);
        self.elements.retain(|(node, _), child| {
            nodes[node.0 as usize].alive && nodes[child.0 as usize].alive
        });

        // Shift the bindings of the elements after the removed one.
        let depth = parent_path.segs.len();
        let mut remapped: Vec<(DataId, usize)> = Vec::new();
        for (position, node) in self.nodes.iter_mut().enumerate() {
            if !node.alive || !parent_path.is_prefix_of(&node.path) {
                continue;
            }
            let segs_len = node.path.segs.len();
            if let Some(Seg::Index(element)) = node.path.segs.get_mut(depth) {
                if *element > index {
                    *element -= 1;
                    if segs_len == depth + 1 {
                        node.element_index = Some(*element);
                        remapped.push((DataId(position as u32), *element));
                    }
                }
            }
        }
        for &(_, new_index) in &remapped {
            self.elements.remove(&(parent, new_index + 1));
        }
        for (node, new_index) in remapped {
            self.elements.insert((parent, new_index), node);
        }

        self.refresh_related(rt, &parent_path);
        removed
    }
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

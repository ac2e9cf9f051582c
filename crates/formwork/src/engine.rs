//! Engine facade: owns the trees, the reactive runtime and the evaluator
//! registry, and drives everything to quiescence.
//!
//! Single-threaded by construction: all entry points take `&mut self`, and
//! one settle call drains the synchronous dirty batch to quiescence before
//! each unit of deferred work, so synchronous facts are always consistent
//! with the latest data before any listener observes them.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::data::{DataId, DataTree};
use crate::definition::{ControlDefinition, SchemaDocument};
use crate::diag::Diagnostics;
use crate::expr::query::Program;
use crate::expr::EvaluatorRegistry;
use crate::form::{FormId, FormTree};
use crate::reactive::{CellId, CompId, CompKind, Deferred, Runtime, ScopeId};
use crate::schema::{SchemaId, SchemaTree};
use crate::state::{ControlContext, ControlId, ControlState, ControlStateData};

pub type ControlListener = Box<dyn FnMut(&ControlState)>;

pub struct FormEngine {
    pub(crate) rt: Runtime,
    pub(crate) schema: SchemaTree,
    pub(crate) data: DataTree,
    pub(crate) forms: FormTree,
    pub(crate) registry: EvaluatorRegistry,
    pub(crate) diags: Diagnostics,
    pub(crate) compiled: FxHashMap<(ScopeId, String), Rc<Program>>,
    pub(crate) controls: Vec<ControlStateData>,
    pub(crate) control_memo: FxHashMap<(Option<DataId>, FormId), ControlId>,
    /// Per-data-node validity: (owning scope, cached result cell).
    pub(crate) validity: FxHashMap<DataId, (ScopeId, CellId)>,
    pub(crate) root_scope: ScopeId,
    pub(crate) data_root: Option<DataId>,
    pub(crate) changed: FxHashSet<ControlId>,
    pub(crate) listeners: FxHashMap<ControlId, Vec<ControlListener>>,
}

impl FormEngine {
    pub fn new() -> Self {
        Self::with_registry(EvaluatorRegistry::with_builtins())
    }

    /// Engine with an explicit evaluator registry. Registries are plain
    /// values: independent engines never share evaluator state.
    pub fn with_registry(registry: EvaluatorRegistry) -> Self {
        let mut rt = Runtime::new();
        let root_scope = rt.create_scope(None);
        Self {
            rt,
            schema: SchemaTree::new(),
            data: DataTree::new(),
            forms: FormTree::new(),
            registry,
            diags: Diagnostics::new(),
            compiled: FxHashMap::default(),
            controls: Vec::new(),
            control_memo: FxHashMap::default(),
            validity: FxHashMap::default(),
            root_scope,
            data_root: None,
            changed: FxHashSet::default(),
            listeners: FxHashMap::default(),
        }
    }

    // --- Setup ---

    pub fn load_schema(&mut self, document: SchemaDocument) -> SchemaId {
        self.schema.load_document(document)
    }

    /// Bind a data document to a schema root; subsequent control states and
    /// expressions resolve against this root.
    pub fn bind_data(&mut self, schema: SchemaId, document: Value) -> DataId {
        let root = self.data.bind_root(schema, document);
        self.data_root = Some(root);
        root
    }

    pub fn load_form(&mut self, definition: ControlDefinition) -> FormId {
        self.forms.load(definition)
    }

    pub(crate) fn ensure_data_root(&mut self) -> DataId {
        if let Some(root) = self.data_root {
            return root;
        }
        let schema = self.schema.load_root(crate::definition::FieldDecl::default());
        let root = self.data.bind_root(schema, Value::Null);
        self.data_root = Some(root);
        root
    }

    // --- Navigation ---

    /// Child data node by field name; identity is stable per
    /// (parent, field).
    pub fn child_node(&mut self, parent: DataId, name: &str) -> DataId {
        let schema_node = self.schema.child_by_name(self.data.schema_of(parent), name);
        self.data.child(&self.schema, parent, schema_node)
    }

    /// Data node for a `/`-delimited field reference.
    pub fn data_node_for(&mut self, parent: DataId, reference: &str) -> DataId {
        let mut node = parent;
        for segment in reference.split('/') {
            match segment {
                "" | "." => {}
                ".." => node = self.data.parent_of(node).unwrap_or(node),
                name => node = self.child_node(node, name),
            }
        }
        node
    }

    pub fn element_node(&mut self, parent: DataId, index: usize) -> DataId {
        self.data.element(parent, index)
    }

    pub fn element_count(&self, parent: DataId) -> usize {
        match self.data.peek(&self.data.path_of(parent)) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    pub fn node_identity(&self, node: DataId) -> std::sync::Arc<str> {
        self.data.node_id(node)
    }

    pub fn value_of(&self, node: DataId) -> Value {
        self.data.peek(&self.data.path_of(node)).unwrap_or(Value::Null)
    }

    // --- Mutation ---

    /// Write a field referenced from `node`. Writes batch: nothing
    /// recomputes until [`FormEngine::run_until_settled`].
    pub fn set_field(&mut self, node: DataId, reference: &str, value: Value) {
        let (_, path) = self.data.resolve_field(&mut self.schema, node, reference);
        self.data.write(&mut self.rt, &path, value);
    }

    pub fn set_value(&mut self, node: DataId, value: Value) {
        self.data.write_node(&mut self.rt, node, value);
    }

    pub fn push_element(&mut self, parent: DataId, value: Value) -> DataId {
        self.data.push_element(&mut self.rt, parent, value)
    }

    /// Remove a collection element and tear down every control state and
    /// cached validity bound under it. Disposal is explicit, not left to
    /// drop timing: dangling subscriptions would otherwise write into
    /// removed state.
    pub fn remove_element(&mut self, parent: DataId, index: usize) {
        let removed = self.data.remove_element(&mut self.rt, parent, index);
        for node in removed {
            if let Some((scope, _)) = self.validity.remove(&node) {
                let disposed = self.rt.dispose_scope(scope);
                self.purge_compiled(&disposed);
            }
            let bound: Vec<ControlId> = self
                .controls
                .iter()
                .enumerate()
                .filter(|(_, control)| control.alive && control.data_node == Some(node))
                .map(|(index, _)| ControlId(index as u32))
                .collect();
            for control in bound {
                self.release_control(control);
            }
        }
    }

    /// Swap a form node's definition (editing tools). Control states keyed
    /// on the old definition subtree are torn down; the next
    /// `control_state` call rebuilds them against the new definition.
    pub fn replace_definition(&mut self, form: FormId, definition: ControlDefinition) {
        let retired = self.forms.replace_definition(form, definition);
        let stale: Vec<ControlId> = self
            .controls
            .iter()
            .enumerate()
            .filter(|(_, control)| control.alive && retired.contains(&control.form))
            .map(|(index, _)| ControlId(index as u32))
            .collect();
        for control in stale {
            self.release_control(control);
        }
    }

    // --- Control lifecycle ---

    /// Tear down one control state: its scope, computations, evaluation
    /// slots and subscriptions. Safe to call twice.
    pub fn release_control(&mut self, control: ControlId) {
        let state = &mut self.controls[control.0 as usize];
        if !state.alive {
            return;
        }
        state.alive = false;
        let scope = state.scope;
        let key = (state.data_node, state.form);
        self.control_memo.remove(&key);
        self.listeners.remove(&control);
        self.changed.remove(&control);
        let disposed = self.rt.dispose_scope(scope);
        self.purge_compiled(&disposed);
    }

    pub(crate) fn purge_compiled(&mut self, disposed: &[ScopeId]) {
        if disposed.is_empty() {
            return;
        }
        self.compiled.retain(|(scope, _), _| !disposed.contains(scope));
    }

    /// Subscribe to a control's state changes. The listener runs once per
    /// settle with a fresh snapshot whenever any of the control's facts
    /// changed in that settle.
    pub fn subscribe(&mut self, control: ControlId, listener: ControlListener) {
        self.listeners.entry(control).or_default().push(listener);
    }

    // --- Scheduling ---

    /// Drain the synchronous dirty batch to quiescence, then run deferred
    /// work one unit at a time (each unit may dirty more synchronous work,
    /// which again settles first). Finally notify subscribers of every
    /// control whose facts changed.
    pub fn run_until_settled(&mut self) {
        loop {
            while let Some(comp) = self.rt.pop_dirty() {
                self.process_comp(comp);
            }
            match self.rt.pop_deferred() {
                Some(task) => self.run_deferred(task),
                None => break,
            }
        }
        self.notify();
    }

    fn process_comp(&mut self, comp: CompId) {
        let Some(kind) = self.rt.comp_kind(comp) else {
            return;
        };
        match kind {
            CompKind::Validity { .. } | CompKind::Fact { .. } => self.run_comp(comp),
            // Query re-evaluation coalesces through its slot instead of
            // running inline.
            CompKind::Query { slot, .. } => self.rt.request_eval(slot),
            CompKind::Effect { .. } => self.rt.defer_effect(comp),
        }
    }

    fn run_deferred(&mut self, task: Deferred) {
        match task {
            Deferred::EvalSlot(slot) => self.run_query_slot(slot),
            Deferred::Effect(comp) => {
                if let Some(CompKind::Effect { control }) = self.rt.comp_kind(comp) {
                    self.run_effect(comp, control);
                }
            }
        }
    }

    fn notify(&mut self) {
        let changed: Vec<ControlId> = self.changed.drain().collect();
        for control in changed {
            if !self.controls[control.0 as usize].alive {
                continue;
            }
            if !self.listeners.contains_key(&control) {
                continue;
            }
            let state = self.snapshot(control);
            let mut listeners = self.listeners.remove(&control).unwrap_or_default();
            for listener in &mut listeners {
                listener(&state);
            }
            self.listeners.entry(control).or_default().extend(listeners);
        }
    }

    // --- Introspection ---

    pub fn form_definition(&self, form: FormId) -> std::sync::Arc<ControlDefinition> {
        self.forms.definition(form)
    }

    pub fn form_children(&self, form: FormId) -> Vec<FormId> {
        self.forms.children(form)
    }

    pub fn decl_of(&self, node: DataId) -> std::sync::Arc<crate::definition::FieldDecl> {
        self.schema.decl(self.data.schema_of(node)).clone()
    }

    /// Evaluate one expression payload against a node, outside any control
    /// scope. Dependencies are not tracked; front ends use this for ad-hoc
    /// evaluation.
    pub fn evaluate_expression(
        &mut self,
        payload: &crate::definition::ExpressionPayload,
        node: DataId,
    ) -> Value {
        let registry = self.registry.clone();
        let mut ctx = crate::expr::EvalContext {
            rt: &mut self.rt,
            schema: &mut self.schema,
            data: &mut self.data,
            diags: &mut self.diags,
            compiled: &mut self.compiled,
            node,
            scope: self.root_scope,
            entry_key: "adhoc".into(),
        };
        registry.evaluate(payload, &mut ctx)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diags
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    pub(crate) fn control(&self, id: ControlId) -> &ControlStateData {
        &self.controls[id.0 as usize]
    }

    pub fn control_for(&self, data: Option<DataId>, form: FormId) -> Option<ControlId> {
        self.control_memo.get(&(data, form)).copied()
    }

    /// Convenience used by front ends: look up or create the control state
    /// for a pair, settle, and snapshot it.
    pub fn resolved_state(
        &mut self,
        data: Option<DataId>,
        form: FormId,
        ctx: ControlContext,
    ) -> ControlState {
        let control = self.control_state(data, form, ctx);
        self.run_until_settled();
        self.snapshot(control)
    }
}

impl Default for FormEngine {
    fn default() -> Self {
        Self::new()
    }
}

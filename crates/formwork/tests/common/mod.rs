//! Shared harness for engine integration tests: build schema/form/data
//! from JSON literals, write fields, settle, and assert on control states.
#![allow(dead_code)]

use formwork::{
    ControlContext, ControlId, ControlState, DataId, EvaluatorRegistry, FormEngine, FormId,
    SchemaDocument,
};
use serde_json::{Value, json};

pub struct Harness {
    pub engine: FormEngine,
    pub root: DataId,
    pub form: FormId,
}

impl Harness {
    pub fn new(fields: Value, form: Value, document: Value) -> Self {
        Self::with_registry(EvaluatorRegistry::with_builtins(), fields, form, document)
    }

    pub fn with_registry(
        registry: EvaluatorRegistry,
        fields: Value,
        form: Value,
        document: Value,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut engine = FormEngine::with_registry(registry);
        let schema_document: SchemaDocument =
            serde_json::from_value(json!({ "fields": fields })).unwrap();
        let schema = engine.load_schema(schema_document);
        let root = engine.bind_data(schema, document);
        let form = engine.load_form(serde_json::from_value(form).unwrap());
        Self { engine, root, form }
    }

    /// Control for `form` bound to the data node at `field` (slash path
    /// from the root), created and settled.
    pub fn bind(&mut self, field: &str, form: FormId) -> ControlId {
        let node = self.engine.data_node_for(self.root, field);
        let control = self.engine.control_state(Some(node), form, ControlContext::default());
        self.engine.run_until_settled();
        control
    }

    /// The n-th child form node of the loaded root form.
    pub fn child_form(&self, index: usize) -> FormId {
        self.engine.form_children(self.form)[index]
    }

    /// Write a field (slash path from the data root) and settle.
    pub fn set(&mut self, field: &str, value: Value) {
        self.engine.set_field(self.root, field, value);
        self.engine.run_until_settled();
    }

    /// Write a field without settling, for multi-write batches.
    pub fn stage(&mut self, field: &str, value: Value) {
        self.engine.set_field(self.root, field, value);
    }

    pub fn settle(&mut self) {
        self.engine.run_until_settled();
    }

    pub fn state(&mut self, control: ControlId) -> ControlState {
        self.engine.snapshot(control)
    }

    pub fn value(&mut self, field: &str) -> Value {
        let node = self.engine.data_node_for(self.root, field);
        self.engine.value_of(node)
    }
}

//! Expression evaluation: pluggable registry plus the built-in evaluators.
//!
//! The registry is a plain dispatch table from an expression-kind tag to an
//! evaluator, constructor-injected into the engine so independent engine
//! instances never share mutable state. Unknown kinds log a warning and
//! evaluate to null.

pub mod query;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use log::warn;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::data::{DataId, DataPath, DataTree};
use crate::definition::ExpressionPayload;
use crate::diag::{Diagnostic, Diagnostics};
use crate::reactive::{Runtime, ScopeId};
use crate::schema::{SchemaId, SchemaTree};

/// Coercion applied to an expression result by the consuming property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Boolean,
    Text,
    Raw,
}

impl Coercion {
    pub fn apply(&self, value: Value) -> Value {
        match self {
            Coercion::Raw => value,
            Coercion::Boolean => Value::Bool(truthy(&value)),
            Coercion::Text => match value {
                Value::Null => Value::Null,
                Value::String(_) => value,
                other => Value::String(stringify(&other)),
            },
        }
    }
}

/// Boolean interpretation shared by coercion and the query language.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// String form used by text coercion and query concatenation.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Everything an evaluator may touch: the data root for path resolution,
/// the scope its dependencies and memoized values live in, and the
/// diagnostics sink.
pub struct EvalContext<'engine> {
    pub rt: &'engine mut Runtime,
    pub schema: &'engine mut SchemaTree,
    pub data: &'engine mut DataTree,
    pub diags: &'engine mut Diagnostics,
    /// Compiled query programs, memoized per (scope, expression text).
    pub compiled: &'engine mut FxHashMap<(ScopeId, String), Rc<query::Program>>,
    /// Path root for relative field references.
    pub node: DataId,
    pub scope: ScopeId,
    /// Stable key of the dynamic entry being evaluated, for per-scope
    /// memoization (identifier generation).
    pub entry_key: String,
}

impl EvalContext<'_> {
    /// Resolve a field reference from the current node. Total; the schema
    /// side may be the missing sentinel.
    pub fn resolve(&mut self, field: &str) -> (SchemaId, DataPath) {
        self.data.resolve_field(self.schema, self.node, field)
    }

    /// Tracked read of a field reference. An unresolvable reference reads
    /// as null and is logged once per (scope, reference).
    pub fn read_field(&mut self, field: &str) -> Value {
        let (schema_node, path) = self.resolve(field);
        if self.schema.is_missing(schema_node) && self.rt.report_once(self.scope, field) {
            warn!("field reference '{field}' does not resolve; evaluating as empty");
        }
        self.data.read(self.rt, &path)
    }

    /// Tracked read keeping the absent/null distinction.
    pub fn read_field_opt(&mut self, field: &str) -> Option<Value> {
        let (_, path) = self.resolve(field);
        self.data.read_opt(self.rt, &path)
    }

    /// Tracked read of a key path, relative to the current node or to the
    /// data root. Used by the query language; every call registers a
    /// dependency on exactly the leaf it touches.
    pub fn read_segments(&mut self, from_root: bool, segments: &[String]) -> Option<Value> {
        let mut path = if from_root {
            DataPath::default()
        } else {
            self.data.path_of(self.node)
        };
        for segment in segments {
            path.segs.push(crate::data::Seg::Key(Arc::from(segment.as_str())));
        }
        self.data.read_opt(self.rt, &path)
    }

    /// Compile a query expression once per (scope, text). Malformed text
    /// compiles to a constant-null program; the errors go to the
    /// diagnostics sink at first compile only.
    pub fn compile_query(&mut self, text: &str) -> Rc<query::Program> {
        let key = (self.scope, text.to_string());
        if let Some(program) = self.compiled.get(&key) {
            return program.clone();
        }
        let program = match query::compile(text) {
            Ok(program) => Rc::new(program),
            Err(errors) => {
                for error in errors {
                    self.diags.push(Diagnostic {
                        source: text.to_string(),
                        message: error.message,
                        span: error.span,
                    });
                }
                Rc::new(query::Program::null(text))
            }
        };
        self.compiled.insert(key, program.clone());
        program
    }
}

/// One evaluation strategy for a tagged expression payload.
pub trait ExpressionEvaluator {
    fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value;
}

/// Dispatch table from expression-kind tag to evaluator.
pub struct EvaluatorRegistry {
    evaluators: HashMap<&'static str, Arc<dyn ExpressionEvaluator>>,
}

impl Clone for EvaluatorRegistry {
    fn clone(&self) -> Self {
        Self { evaluators: self.evaluators.clone() }
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self { evaluators: HashMap::new() }
    }

    /// Registry preloaded with the built-in evaluators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("FieldValue", Arc::new(FieldValueEvaluator));
        registry.register("Data", Arc::new(DataEvaluator));
        registry.register("NotEmpty", Arc::new(NotEmptyEvaluator));
        registry.register("UUID", Arc::new(UuidEvaluator));
        registry.register("Jsonata", Arc::new(QueryEvaluator));
        registry
    }

    pub fn register(&mut self, kind: &'static str, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.evaluators.insert(kind, evaluator);
    }

    pub fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        match self.evaluators.get(payload.kind()) {
            Some(evaluator) => evaluator.evaluate(payload, ctx),
            None => {
                warn!("unknown expression evaluator '{}'", payload.kind());
                Value::Null
            }
        }
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// True if the referenced field equals the expected value, or contains it
/// when the stored value is an array.
struct FieldValueEvaluator;

impl ExpressionEvaluator for FieldValueEvaluator {
    fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        let ExpressionPayload::FieldValue { field, value } = payload else {
            return Value::Null;
        };
        let stored = ctx.read_field(field);
        let matched = match &stored {
            Value::Array(items) => items.contains(value),
            other => other == value,
        };
        Value::Bool(matched)
    }
}

/// Raw value pass-through; the consuming property applies its coercion.
struct DataEvaluator;

impl ExpressionEvaluator for DataEvaluator {
    fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        let ExpressionPayload::Data { field } = payload else {
            return Value::Null;
        };
        ctx.read_field(field)
    }
}

/// Type-aware emptiness check; false when the field cannot be resolved.
struct NotEmptyEvaluator;

impl ExpressionEvaluator for NotEmptyEvaluator {
    fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        let ExpressionPayload::NotEmpty { field } = payload else {
            return Value::Null;
        };
        let (schema_node, _) = ctx.resolve(field);
        if ctx.schema.is_missing(schema_node) {
            if ctx.rt.report_once(ctx.scope, field) {
                warn!("field reference '{field}' does not resolve; NotEmpty is false");
            }
            return Value::Bool(false);
        }
        let field_type = ctx.schema.decl(schema_node).field_type;
        let stored = ctx.read_field(field);
        Value::Bool(!field_type.is_empty(&stored))
    }
}

/// Fresh random identifier, memoized per (scope, entry), so re-runs of the
/// same scope observe one stable value and no dependencies are recorded.
struct UuidEvaluator;

impl ExpressionEvaluator for UuidEvaluator {
    fn evaluate(&self, _payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        let key = format!("uuid:{}", ctx.entry_key);
        if let Some(existing) = ctx.rt.scope_memo_get(ctx.scope, &key) {
            return existing;
        }
        let generated = Value::String(uuid::Uuid::new_v4().to_string());
        ctx.rt.scope_memo_insert(ctx.scope, key, generated.clone());
        generated
    }
}

/// Embedded query-language evaluation: compile once per (scope, text),
/// interpret against the data root through tracked leaf reads.
struct QueryEvaluator;

impl ExpressionEvaluator for QueryEvaluator {
    fn evaluate(&self, payload: &ExpressionPayload, ctx: &mut EvalContext<'_>) -> Value {
        let ExpressionPayload::Jsonata { expression } = payload else {
            return Value::Null;
        };
        let program = ctx.compile_query(expression);
        query::evaluate(&program, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SchemaDocument;
    use serde_json::json;

    struct Fixture {
        rt: Runtime,
        schema: SchemaTree,
        data: DataTree,
        diags: Diagnostics,
        compiled: FxHashMap<(ScopeId, String), Rc<query::Program>>,
        node: DataId,
        scope: ScopeId,
    }

    impl Fixture {
        fn new(fields: serde_json::Value, document: Value) -> Self {
            let schema_document: SchemaDocument =
                serde_json::from_value(json!({ "fields": fields })).unwrap();
            let mut schema = SchemaTree::new();
            let root = schema.load_document(schema_document);
            let mut data = DataTree::new();
            let node = data.bind_root(root, document);
            let mut rt = Runtime::new();
            let scope = rt.create_scope(None);
            Self {
                rt,
                schema,
                data,
                diags: Diagnostics::new(),
                compiled: FxHashMap::default(),
                node,
                scope,
            }
        }

        fn ctx(&mut self) -> EvalContext<'_> {
            EvalContext {
                rt: &mut self.rt,
                schema: &mut self.schema,
                data: &mut self.data,
                diags: &mut self.diags,
                compiled: &mut self.compiled,
                node: self.node,
                scope: self.scope,
                entry_key: "test".into(),
            }
        }
    }

    #[test]
    fn field_value_matches_scalar_and_array() {
        let mut fixture = Fixture::new(
            json!([
                { "field": "status", "type": "string" },
                { "field": "tags", "type": "string", "collection": true },
            ]),
            json!({ "status": "open", "tags": ["a", "b"] }),
        );
        let registry = EvaluatorRegistry::with_builtins();

        let payload = ExpressionPayload::FieldValue { field: "status".into(), value: json!("open") };
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), json!(true));

        let payload = ExpressionPayload::FieldValue { field: "tags".into(), value: json!("b") };
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), json!(true));

        let payload = ExpressionPayload::FieldValue { field: "tags".into(), value: json!("z") };
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), json!(false));
    }

    #[test]
    fn not_empty_is_false_for_unresolvable_field() {
        let mut fixture = Fixture::new(json!([]), json!({}));
        let registry = EvaluatorRegistry::with_builtins();
        let payload = ExpressionPayload::NotEmpty { field: "ghost".into() };
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), json!(false));
    }

    #[test]
    fn not_empty_uses_type_rule() {
        let mut fixture = Fixture::new(
            json!([
                { "field": "name", "type": "string" },
                { "field": "done", "type": "bool" },
            ]),
            json!({ "name": "", "done": false }),
        );
        let registry = EvaluatorRegistry::with_builtins();
        let name = ExpressionPayload::NotEmpty { field: "name".into() };
        assert_eq!(registry.evaluate(&name, &mut fixture.ctx()), json!(false));
        // A stored false is still a value for a bool field.
        let done = ExpressionPayload::NotEmpty { field: "done".into() };
        assert_eq!(registry.evaluate(&done, &mut fixture.ctx()), json!(true));
    }

    #[test]
    fn uuid_is_stable_within_scope() {
        let mut fixture = Fixture::new(json!([]), json!({}));
        let registry = EvaluatorRegistry::with_builtins();
        let first = registry.evaluate(&ExpressionPayload::Uuid, &mut fixture.ctx());
        let second = registry.evaluate(&ExpressionPayload::Uuid, &mut fixture.ctx());
        assert_eq!(first, second);
        assert!(matches!(&first, Value::String(text) if !text.is_empty()));
    }

    #[test]
    fn unknown_kind_logs_and_returns_null() {
        let mut fixture = Fixture::new(json!([]), json!({}));
        let registry = EvaluatorRegistry::new();
        let payload = ExpressionPayload::Uuid;
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), Value::Null);
    }

    #[test]
    fn malformed_query_compiles_to_null_once() {
        let mut fixture = Fixture::new(json!([]), json!({}));
        let registry = EvaluatorRegistry::with_builtins();
        let payload = ExpressionPayload::Jsonata { expression: "1 +".into() };
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), Value::Null);
        let reported = fixture.diags.entries().len();
        assert!(reported > 0);
        // Second evaluation reuses the memoized program; no new diagnostics.
        assert_eq!(registry.evaluate(&payload, &mut fixture.ctx()), Value::Null);
        assert_eq!(fixture.diags.entries().len(), reported);
    }
}

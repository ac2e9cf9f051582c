//! Reactive form-state engine.
//!
//! Given a schema tree (data shape), a control tree (how that data is
//! edited) and a live data document, the engine derives a continuously
//! updated [`ControlState`] per (data node, form node) pair: visibility,
//! read-only, disabled, title, style, default value and allowed options,
//! all computed from declarative expressions that may reference any node
//! in the tree.
//!
//! Renderers are external: they ask the [`FormEngine`] for control states,
//! subscribe to changes, and never participate in the computation itself.

pub mod data;
pub mod definition;
pub mod diag;
pub mod engine;
pub mod expr;
pub mod form;
pub mod reactive;
pub mod schema;
pub mod state;

pub use data::{DataId, DataPath};
pub use definition::{
    ControlDefinition, DynamicEntry, DynamicProperty, ExpressionPayload, FieldDecl, FieldOption,
    FieldType, SchemaDocument,
};
pub use diag::{Diagnostic, Diagnostics};
pub use engine::FormEngine;
pub use expr::{Coercion, EvalContext, EvaluatorRegistry, ExpressionEvaluator};
pub use form::FormId;
pub use schema::SchemaId;
pub use state::{ControlContext, ControlId, ControlState, Fact};

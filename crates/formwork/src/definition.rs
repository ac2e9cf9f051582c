//! Wire model for schema and form definitions.
//!
//! Everything here is plain serde data: field declarations describing data
//! shape, control definitions describing how that data is edited, and the
//! tagged expression payloads bound to dynamic properties. The engine never
//! mutates these in place; it builds arena trees over them (see `schema` and
//! `form`) and composes computed overrides on top (see `state`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag of a field declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    Bool,
    Int,
    Double,
    Date,
    #[serde(rename = "datetime", alias = "dateTime")]
    DateTime,
    Time,
    #[serde(rename = "entityRef", alias = "entity-reference")]
    EntityRef,
    Compound,
    Id,
    Image,
    #[default]
    Any,
}

impl FieldType {
    /// Whether a value counts as empty for this field type.
    ///
    /// Used by the `NotEmpty` evaluator and by default-value application
    /// ("has no existing value").
    pub fn is_empty(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(text) => matches!(
                self,
                FieldType::String
                    | FieldType::EntityRef
                    | FieldType::Id
                    | FieldType::Image
                    | FieldType::Any
            ) && text.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

/// One selectable option of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub name: String,
    pub value: Value,
}

/// Declaration of a single field in a schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDecl {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Collection-typed binding (list of elements).
    pub collection: bool,
    /// Explicit children of a compound field.
    pub children: Vec<FieldDecl>,
    /// Redirect child enumeration to a named shared schema instead of
    /// `children`. Two structurally distinct nodes referencing the same
    /// schema are logically identical for navigation.
    pub schema_ref: Option<String>,
    /// Restrict this branch to parents whose discriminator field currently
    /// holds one of these values.
    pub only_for_types: Vec<String>,
    /// Marks the discriminator field consulted by sibling `only_for_types`
    /// restrictions.
    pub is_type_field: bool,
    /// Bind against the side meta container instead of user data.
    pub meta: bool,
    pub title: Option<String>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub options: Vec<FieldOption>,
    /// Validator configurations, opaque to the engine and passed through
    /// to renderers.
    pub validators: Vec<Value>,
}

impl Default for FieldDecl {
    fn default() -> Self {
        Self {
            field: String::new(),
            field_type: FieldType::Any,
            collection: false,
            children: Vec::new(),
            schema_ref: None,
            only_for_types: Vec::new(),
            is_type_field: false,
            meta: false,
            title: None,
            default_value: None,
            required: false,
            options: Vec::new(),
            validators: Vec::new(),
        }
    }
}

impl FieldDecl {
    /// Sentinel declaration for an unresolved field name. Navigation through
    /// schema trees is total: a missing segment yields this instead of an
    /// error, so callers can still describe the failure contextually.
    pub fn missing(name: &str) -> Self {
        Self {
            field: name.to_string(),
            field_type: FieldType::Any,
            ..Self::default()
        }
    }
}

/// A document combining top-level fields with a table of named shared
/// schemas targeted by `schemaRef`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaDocument {
    pub fields: Vec<FieldDecl>,
    pub schemas: Vec<FieldDecl>,
}

/// Control-definition attribute whose value may be computed from an
/// expression instead of being static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DynamicProperty {
    Visible,
    Readonly,
    Disabled,
    Label,
    DefaultValue,
    Style,
    LayoutStyle,
    AllowedOptions,
    ActionData,
}

impl DynamicProperty {
    pub const ALL: [DynamicProperty; 9] = [
        DynamicProperty::Visible,
        DynamicProperty::Readonly,
        DynamicProperty::Disabled,
        DynamicProperty::Label,
        DynamicProperty::DefaultValue,
        DynamicProperty::Style,
        DynamicProperty::LayoutStyle,
        DynamicProperty::AllowedOptions,
        DynamicProperty::ActionData,
    ];
}

/// Expression payload, tagged by evaluator kind.
///
/// Field references are `/`-delimited paths with `.` (self) and `..`
/// (parent) navigation tokens, resolved relative to the control's bound
/// data node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExpressionPayload {
    /// True if the value at `field` equals `value`, or contains it when the
    /// stored value is an array.
    FieldValue { field: String, value: Value },
    /// Raw value pass-through, coerced by the consuming property.
    Data { field: String },
    /// True if `field` is non-empty per its type-specific emptiness rule.
    NotEmpty { field: String },
    /// Fresh random identifier, generated once per scope.
    #[serde(rename = "UUID")]
    Uuid,
    /// Embedded query-language expression evaluated against the data root.
    Jsonata { expression: String },
}

impl ExpressionPayload {
    /// Registry key for this payload's evaluator.
    pub fn kind(&self) -> &'static str {
        match self {
            ExpressionPayload::FieldValue { .. } => "FieldValue",
            ExpressionPayload::Data { .. } => "Data",
            ExpressionPayload::NotEmpty { .. } => "NotEmpty",
            ExpressionPayload::Uuid => "UUID",
            ExpressionPayload::Jsonata { .. } => "Jsonata",
        }
    }

    /// Whether evaluation must be deferred until the synchronous batch has
    /// settled (embedded-language traversal), as opposed to running inline
    /// inside the triggering batch.
    pub fn is_deferred(&self) -> bool {
        matches!(self, ExpressionPayload::Jsonata { .. })
    }
}

/// One dynamic-property binding of a control definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntry {
    pub property: DynamicProperty,
    #[serde(rename = "expression", alias = "expr")]
    pub expr: ExpressionPayload,
}

/// A node in the control/definition tree: what to render and how,
/// independent of data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlDefinition {
    pub title: Option<String>,
    /// Schema path of the bound field, relative to the parent control's
    /// data node.
    pub field: Option<String>,
    pub children: Vec<ControlDefinition>,
    pub dynamic: Vec<DynamicEntry>,
    pub hidden: bool,
    pub readonly: bool,
    pub disabled: bool,
    pub display_only: bool,
    pub inline: bool,
    pub style_class: Option<String>,
    pub layout_class: Option<String>,
    pub default_value: Option<Value>,
    /// Keep the bound value when this control becomes hidden.
    pub dont_clear_hidden: bool,
    /// Optional-toggle controls never receive automatic defaults.
    pub optional: bool,
}

impl ControlDefinition {
    /// First dynamic entry bound to `property`, if any.
    pub fn dynamic_for(&self, property: DynamicProperty) -> Option<&DynamicEntry> {
        self.dynamic.iter().find(|entry| entry.property == property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expression_payload_round_trips_tagged() {
        let payload: ExpressionPayload = serde_json::from_value(json!({
            "type": "FieldValue",
            "field": "visible",
            "value": true,
        }))
        .unwrap();
        assert_eq!(
            payload,
            ExpressionPayload::FieldValue {
                field: "visible".into(),
                value: json!(true),
            }
        );
        assert_eq!(payload.kind(), "FieldValue");

        let uuid: ExpressionPayload = serde_json::from_value(json!({ "type": "UUID" })).unwrap();
        assert_eq!(uuid, ExpressionPayload::Uuid);
    }

    #[test]
    fn field_decl_defaults_fill_missing_keys() {
        let decl: FieldDecl = serde_json::from_value(json!({
            "field": "status",
            "type": "string",
        }))
        .unwrap();
        assert_eq!(decl.field_type, FieldType::String);
        assert!(!decl.collection);
        assert!(decl.children.is_empty());
    }

    #[test]
    fn emptiness_follows_field_type() {
        assert!(FieldType::String.is_empty(&json!("")));
        assert!(!FieldType::String.is_empty(&json!("x")));
        assert!(FieldType::Bool.is_empty(&json!(null)));
        assert!(!FieldType::Bool.is_empty(&json!(false)));
        assert!(FieldType::Compound.is_empty(&json!(null)));
        assert!(FieldType::Any.is_empty(&json!([])));
        assert!(!FieldType::Int.is_empty(&json!(0)));
    }
}

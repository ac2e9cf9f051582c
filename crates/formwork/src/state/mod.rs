//! Control state: the engine's output record.
//!
//! A control state composes the static control definition with computed
//! overrides. Composition is explicit: accessors consult the override map
//! first and fall back to the static definition (and the schema
//! declaration), so no proxying is involved and renderers can resolve any
//! property deterministically.

mod orchestrator;

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::definition::{ControlDefinition, DynamicProperty, FieldOption};
use crate::expr::stringify;
use crate::reactive::{CellId, ScopeId, SlotId};
use crate::{data::DataId, form::FormId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub(crate) u32);

/// One computed fact of a control state, each independently scoped so that
/// recomputing one never forces the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fact {
    Hidden,
    Readonly,
    Disabled,
    /// Mirror of the bound value, so value edits reach subscribers.
    Value,
    Title,
    Style,
    LayoutStyle,
    AllowedOptions,
    ActionData,
}

impl Fact {
    /// The dynamic property feeding this fact, where one exists.
    pub fn property(&self) -> Option<DynamicProperty> {
        match self {
            Fact::Hidden => Some(DynamicProperty::Visible),
            Fact::Readonly => Some(DynamicProperty::Readonly),
            Fact::Disabled => Some(DynamicProperty::Disabled),
            Fact::Value => None,
            Fact::Title => Some(DynamicProperty::Label),
            Fact::Style => Some(DynamicProperty::Style),
            Fact::LayoutStyle => Some(DynamicProperty::LayoutStyle),
            Fact::AllowedOptions => Some(DynamicProperty::AllowedOptions),
            Fact::ActionData => Some(DynamicProperty::ActionData),
        }
    }
}

/// Ambient flags a control inherits from its surroundings. With a `parent`
/// set, the ambient hidden/readonly/disabled are read live from the parent
/// control's facts; the static flags then act as additional forcing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlContext {
    pub parent: Option<ControlId>,
    pub hidden: bool,
    pub readonly: bool,
    pub disabled: bool,
    pub display_only: bool,
}

impl ControlContext {
    pub fn under(parent: ControlId) -> Self {
        Self { parent: Some(parent), ..Self::default() }
    }
}

/// Book-keeping for one live (data node, form node) pair.
pub(crate) struct ControlStateData {
    pub(crate) form: FormId,
    pub(crate) data_node: Option<DataId>,
    /// Path root for relative field references: the enclosing data
    /// context, so a leaf-bound control addresses its siblings.
    pub(crate) eval_node: DataId,
    pub(crate) ctx: ControlContext,
    pub(crate) scope: ScopeId,
    pub(crate) fact_scopes: IndexMap<Fact, ScopeId>,
    pub(crate) cells: IndexMap<Fact, CellId>,
    /// Deferred-evaluation plumbing per dynamic property backed by the
    /// query language: (slot, result cell).
    pub(crate) query: IndexMap<DynamicProperty, (SlotId, CellId)>,
    pub(crate) alive: bool,
}

/// Snapshot of a control's composed state, consumed by renderers.
#[derive(Debug, Clone)]
pub struct ControlState {
    pub definition: Arc<ControlDefinition>,
    /// Stable identity token of the bound data node.
    pub data_node: Option<Arc<str>>,
    /// Current bound value (`formData`).
    pub value: Value,
    pub hidden: bool,
    pub readonly: bool,
    pub disabled: bool,
    pub display_only: bool,
    pub inline: bool,
    /// Options declared on the schema field, before any dynamic override.
    pub field_options: Vec<FieldOption>,
    pub(crate) schema_default: Option<Value>,
    pub(crate) overrides: IndexMap<DynamicProperty, Value>,
}

impl ControlState {
    /// Computed override for a dynamic property, if one is live.
    pub fn resolved(&self, property: DynamicProperty) -> Option<&Value> {
        self.overrides.get(&property)
    }

    pub fn title(&self) -> Option<String> {
        match self.resolved(DynamicProperty::Label) {
            Some(Value::Null) | None => self.definition.title.clone(),
            Some(value) => Some(stringify(value)),
        }
    }

    pub fn style_class(&self) -> Option<String> {
        match self.resolved(DynamicProperty::Style) {
            Some(Value::Null) | None => self.definition.style_class.clone(),
            Some(value) => Some(stringify(value)),
        }
    }

    pub fn layout_class(&self) -> Option<String> {
        match self.resolved(DynamicProperty::LayoutStyle) {
            Some(Value::Null) | None => self.definition.layout_class.clone(),
            Some(value) => Some(stringify(value)),
        }
    }

    /// Allowed options: dynamic override, else the schema field's options.
    pub fn allowed_options(&self) -> Vec<FieldOption> {
        match self.resolved(DynamicProperty::AllowedOptions) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => FieldOption {
                        name: map
                            .get("name")
                            .map(stringify)
                            .unwrap_or_else(|| stringify(item)),
                        value: map.get("value").cloned().unwrap_or_else(|| item.clone()),
                    },
                    other => FieldOption { name: stringify(other), value: other.clone() },
                })
                .collect(),
            _ => self.field_options.clone(),
        }
    }

    pub fn action_data(&self) -> Option<&Value> {
        match self.resolved(DynamicProperty::ActionData) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Effective default: dynamic override, else the control definition's,
    /// else the schema declaration's.
    pub fn default_value(&self) -> Option<Value> {
        match self.resolved(DynamicProperty::DefaultValue) {
            Some(Value::Null) | None => self
                .definition
                .default_value
                .clone()
                .or_else(|| self.schema_default.clone()),
            Some(value) => Some(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(definition: serde_json::Value) -> ControlState {
        ControlState {
            definition: Arc::new(serde_json::from_value(definition).unwrap()),
            data_node: None,
            value: Value::Null,
            hidden: false,
            readonly: false,
            disabled: false,
            display_only: false,
            inline: false,
            field_options: Vec::new(),
            schema_default: None,
            overrides: IndexMap::new(),
        }
    }

    #[test]
    fn accessors_fall_back_to_static_definition() {
        let state = state_with(json!({ "title": "Static", "styleClass": "wide" }));
        assert_eq!(state.title().as_deref(), Some("Static"));
        assert_eq!(state.style_class().as_deref(), Some("wide"));
        assert!(state.action_data().is_none());
    }

    #[test]
    fn overrides_win_over_static_values() {
        let mut state = state_with(json!({ "title": "Static" }));
        state.overrides.insert(DynamicProperty::Label, json!("Computed"));
        assert_eq!(state.title().as_deref(), Some("Computed"));
        // A null override keeps the static value.
        state.overrides.insert(DynamicProperty::Label, Value::Null);
        assert_eq!(state.title().as_deref(), Some("Static"));
    }

    #[test]
    fn allowed_options_accept_plain_and_named_entries() {
        let mut state = state_with(json!({}));
        state.field_options.push(FieldOption { name: "A".into(), value: json!("a") });
        assert_eq!(state.allowed_options().len(), 1);

        state.overrides.insert(
            DynamicProperty::AllowedOptions,
            json!(["x", { "name": "Why", "value": "y" }]),
        );
        let options = state.allowed_options();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].name, "x");
        assert_eq!(options[1].name, "Why");
        assert_eq!(options[1].value, json!("y"));
    }

    #[test]
    fn default_value_priority() {
        let mut state = state_with(json!({ "defaultValue": "from-control" }));
        state.schema_default = Some(json!("from-schema"));
        assert_eq!(state.default_value(), Some(json!("from-control")));
        state.overrides.insert(DynamicProperty::DefaultValue, json!("from-expr"));
        assert_eq!(state.default_value(), Some(json!("from-expr")));

        let mut state = state_with(json!({}));
        state.schema_default = Some(json!("from-schema"));
        assert_eq!(state.default_value(), Some(json!("from-schema")));
    }
}

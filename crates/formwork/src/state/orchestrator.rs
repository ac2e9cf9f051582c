//! Form-state orchestration: one scope per (data node, form node) pair,
//! one dependency-tracked computation per dynamic fact, plus the deferred
//! default-value/clear effect.

use indexmap::IndexMap;
use log::warn;
use serde_json::Value;

use crate::data::DataId;
use crate::definition::{ControlDefinition, DynamicEntry, DynamicProperty};
use crate::engine::FormEngine;
use crate::expr::{Coercion, EvalContext, truthy};
use crate::form::FormId;
use crate::reactive::{CompId, CompKind, CellId, ScopeId, SlotId};
use crate::state::{ControlContext, ControlId, ControlState, ControlStateData, Fact};

/// The fact a dynamic property feeds, where the property has one.
/// `DefaultValue` feeds the deferred effect instead.
fn fact_for_property(property: DynamicProperty) -> Option<Fact> {
    match property {
        DynamicProperty::Visible => Some(Fact::Hidden),
        DynamicProperty::Readonly => Some(Fact::Readonly),
        DynamicProperty::Disabled => Some(Fact::Disabled),
        DynamicProperty::Label => Some(Fact::Title),
        DynamicProperty::Style => Some(Fact::Style),
        DynamicProperty::LayoutStyle => Some(Fact::LayoutStyle),
        DynamicProperty::AllowedOptions => Some(Fact::AllowedOptions),
        DynamicProperty::ActionData => Some(Fact::ActionData),
        DynamicProperty::DefaultValue => None,
    }
}

fn coercion_for(fact: Fact) -> Coercion {
    match fact {
        Fact::Hidden | Fact::Readonly | Fact::Disabled => Coercion::Boolean,
        Fact::Title | Fact::Style | Fact::LayoutStyle => Coercion::Text,
        Fact::Value | Fact::AllowedOptions | Fact::ActionData => Coercion::Raw,
    }
}

impl FormEngine {
    /// Look up or create the control state for a (data node, form node)
    /// pair. The memo table is the sole owner of pair scopes: repeated
    /// calls return the same control, so no two call sites can hold
    /// independent state for one pair.
    pub fn control_state(
        &mut self,
        data: Option<DataId>,
        form: FormId,
        ctx: ControlContext,
    ) -> ControlId {
        let key = (data, form);
        if let Some(&existing) = self.control_memo.get(&key) {
            if self.controls[existing.0 as usize].alive {
                return existing;
            }
        }

        // Relative field references resolve against the enclosing data
        // context: a control bound to a leaf addresses its siblings.
        let eval_node = match data {
            Some(node) => self.data.parent_of(node).unwrap_or(node),
            None => match ctx.parent {
                Some(parent) => self.controls[parent.0 as usize].eval_node,
                None => self.ensure_data_root(),
            },
        };
        let def = self.forms.definition(form);
        let scope = self.rt.create_scope(Some(self.root_scope));
        let id = ControlId(self.controls.len() as u32);

        let mut facts = vec![Fact::Hidden, Fact::Readonly, Fact::Disabled];
        if data.is_some() {
            facts.push(Fact::Value);
        }
        for fact in [
            Fact::Title,
            Fact::Style,
            Fact::LayoutStyle,
            Fact::AllowedOptions,
            Fact::ActionData,
        ] {
            let has_entry = fact
                .property()
                .is_some_and(|property| def.dynamic_for(property).is_some());
            if has_entry {
                facts.push(fact);
            }
        }

        let mut fact_scopes: IndexMap<Fact, ScopeId> = IndexMap::new();
        let mut cells: IndexMap<Fact, CellId> = IndexMap::new();
        for &fact in &facts {
            let fact_scope = self.rt.create_scope(Some(scope));
            let cell = self.rt.scoped_cell(fact_scope, Value::Null);
            fact_scopes.insert(fact, fact_scope);
            cells.insert(fact, cell);
        }

        // Deferred-evaluation plumbing, one slot per query-backed property.
        let mut query: IndexMap<DynamicProperty, (SlotId, CellId)> = IndexMap::new();
        for entry in &def.dynamic {
            if !entry.expr.is_deferred() || query.contains_key(&entry.property) {
                continue;
            }
            let owner = fact_for_property(entry.property)
                .and_then(|fact| fact_scopes.get(&fact).copied())
                .unwrap_or(scope);
            let out = self.rt.scoped_cell(owner, Value::Null);
            let comp = self.rt.create_comp(
                owner,
                CompKind::Query { control: id, property: entry.property, slot: SlotId(0), out },
            );
            let slot = self.rt.create_slot(owner, comp);
            self.rt.set_comp_kind(
                comp,
                CompKind::Query { control: id, property: entry.property, slot, out },
            );
            query.insert(entry.property, (slot, out));
        }

        let decl_default = data.and_then(|node| {
            self.schema.decl(self.data.schema_of(node)).default_value.clone()
        });
        let has_default = def.dynamic_for(DynamicProperty::DefaultValue).is_some()
            || def.default_value.is_some()
            || decl_default.is_some();
        let wants_effect = data.is_some() && (has_default || !def.dont_clear_hidden);

        self.controls.push(ControlStateData {
            form,
            data_node: data,
            eval_node,
            ctx,
            scope,
            fact_scopes: fact_scopes.clone(),
            cells,
            query: query.clone(),
            alive: true,
        });
        self.control_memo.insert(key, id);

        for &fact in &facts {
            let fact_scope = fact_scopes[&fact];
            let comp = self.rt.create_comp(fact_scope, CompKind::Fact { control: id, fact });
            self.run_comp(comp);
        }
        for &(slot, _) in query.values() {
            self.rt.request_eval(slot);
        }
        if wants_effect {
            let comp = self.rt.create_comp(scope, CompKind::Effect { control: id });
            self.rt.defer_effect(comp);
        }
        id
    }

    pub(crate) fn run_comp(&mut self, comp: CompId) {
        let Some(kind) = self.rt.comp_kind(comp) else {
            return;
        };
        match kind {
            CompKind::Validity { node, out } => {
                let scope = match self.validity.get(&node) {
                    Some(&(scope, _)) => scope,
                    None => self.root_scope,
                };
                self.rt.begin(comp);
                let valid = self.compute_validity(node, scope);
                self.rt.end(comp);
                self.rt.write(out, Value::Bool(valid));
            }
            CompKind::Fact { control, fact } => {
                if !self.controls[control.0 as usize].alive {
                    return;
                }
                self.rt.begin(comp);
                let value = self.compute_fact(control, fact);
                self.rt.end(comp);
                let cell = self.control(control).cells[&fact];
                if self.rt.write(cell, value) {
                    self.changed.insert(control);
                }
            }
            CompKind::Query { .. } | CompKind::Effect { .. } => {}
        }
    }

    fn compute_fact(&mut self, control: ControlId, fact: Fact) -> Value {
        let state = self.control(control);
        let (form, data_node, ctx) = (state.form, state.data_node, state.ctx);
        let def = self.forms.definition(form);
        match fact {
            Fact::Hidden => {
                let mut hidden = self.ambient(ctx, Fact::Hidden) || def.hidden;
                if !hidden {
                    if let Some(entry) = def.dynamic_for(DynamicProperty::Visible) {
                        let visible =
                            self.eval_entry(control, Some(fact), entry, Coercion::Boolean);
                        hidden = !truthy(&visible);
                    }
                }
                if !hidden {
                    if let Some(node) = data_node {
                        let cell = self.ensure_validity(node);
                        hidden = !truthy(&self.rt.read(cell));
                    }
                }
                Value::Bool(hidden)
            }
            Fact::Readonly => {
                let mut readonly = self.ambient(ctx, Fact::Readonly) || def.readonly;
                if !readonly {
                    if let Some(entry) = def.dynamic_for(DynamicProperty::Readonly) {
                        readonly =
                            truthy(&self.eval_entry(control, Some(fact), entry, Coercion::Boolean));
                    }
                }
                Value::Bool(readonly)
            }
            Fact::Disabled => {
                let mut disabled = self.ambient(ctx, Fact::Disabled) || def.disabled;
                if !disabled {
                    if let Some(entry) = def.dynamic_for(DynamicProperty::Disabled) {
                        disabled =
                            truthy(&self.eval_entry(control, Some(fact), entry, Coercion::Boolean));
                    }
                }
                Value::Bool(disabled)
            }
            Fact::Value => match data_node {
                Some(node) => self.data.read_node(&mut self.rt, node),
                None => Value::Null,
            },
            Fact::Title | Fact::Style | Fact::LayoutStyle | Fact::AllowedOptions
            | Fact::ActionData => {
                let property = fact.property().unwrap_or(DynamicProperty::Label);
                match def.dynamic_for(property) {
                    Some(entry) => self.eval_entry(control, Some(fact), entry, coercion_for(fact)),
                    None => Value::Null,
                }
            }
        }
    }

    /// Inherited flag: read live from the parent control's fact when a
    /// parent is set, so ancestor changes propagate as ordinary
    /// dependencies; otherwise the static context value.
    fn ambient(&mut self, ctx: ControlContext, fact: Fact) -> bool {
        match ctx.parent {
            Some(parent) if self.controls[parent.0 as usize].alive => {
                match self.control(parent).cells.get(&fact).copied() {
                    Some(cell) => truthy(&self.rt.read(cell)),
                    None => false,
                }
            }
            _ => match fact {
                Fact::Hidden => ctx.hidden,
                Fact::Readonly => ctx.readonly,
                Fact::Disabled => ctx.disabled,
                _ => false,
            },
        }
    }

    /// Evaluate one dynamic entry. Query-backed entries read their slot's
    /// result cell (registering it as a dependency); everything else runs
    /// inline through the registry.
    fn eval_entry(
        &mut self,
        control: ControlId,
        owner: Option<Fact>,
        entry: &DynamicEntry,
        coercion: Coercion,
    ) -> Value {
        if entry.expr.is_deferred() {
            let cell = self
                .control(control)
                .query
                .get(&entry.property)
                .map(|&(_, cell)| cell);
            return match cell {
                Some(cell) => coercion.apply(self.rt.read(cell)),
                None => Value::Null,
            };
        }
        let state = self.control(control);
        let eval_node = state.eval_node;
        let scope = owner
            .and_then(|fact| state.fact_scopes.get(&fact).copied())
            .unwrap_or(state.scope);
        let registry = self.registry.clone();
        let mut ctx = EvalContext {
            rt: &mut self.rt,
            schema: &mut self.schema,
            data: &mut self.data,
            diags: &mut self.diags,
            compiled: &mut self.compiled,
            node: eval_node,
            scope,
            entry_key: format!("{:?}", entry.property),
        };
        coercion.apply(registry.evaluate(&entry.expr, &mut ctx))
    }

    // --- Validity ---

    /// Cached per-node validity cell; the backing computation re-runs only
    /// when a watched discriminator changes.
    pub(crate) fn ensure_validity(&mut self, node: DataId) -> CellId {
        if let Some(&(_, cell)) = self.validity.get(&node) {
            return cell;
        }
        let scope = self.rt.create_scope(Some(self.root_scope));
        let cell = self.rt.scoped_cell(scope, Value::Bool(true));
        self.validity.insert(node, (scope, cell));
        let comp = self.rt.create_comp(scope, CompKind::Validity { node, out: cell });
        self.run_comp(comp);
        cell
    }

    /// Walk the ancestor chain: every type-restricted branch must have a
    /// sibling discriminator currently holding one of its allowed values.
    /// A restricted branch without a discriminator field is a
    /// configuration error: warned once, treated as invalid.
    fn compute_validity(&mut self, node: DataId, scope: ScopeId) -> bool {
        let mut current = node;
        while let Some(parent) = self.data.parent_of(current) {
            // Element bindings share their schema with the collection
            // field; the restriction is checked once, on the field.
            let is_element = self.data.element_index(current).is_some();
            let schema_node = self.data.schema_of(current);
            let only_for = self.schema.decl(schema_node).only_for_types.clone();
            if !is_element && !only_for.is_empty() {
                let parent_schema = self.data.schema_of(parent);
                let discriminator = self
                    .schema
                    .children(parent_schema)
                    .into_iter()
                    .find(|&sibling| self.schema.decl(sibling).is_type_field);
                let Some(discriminator) = discriminator else {
                    let field = self.schema.decl(schema_node).field.clone();
                    if self.rt.report_once(scope, &format!("discriminator:{field}")) {
                        warn!("no discriminator field beside type-restricted '{field}'");
                    }
                    return false;
                };
                let discriminator_node = self.data.child(&self.schema, parent, discriminator);
                let value = self.data.read_node(&mut self.rt, discriminator_node);
                let allowed = match &value {
                    Value::String(tag) => only_for.iter().any(|candidate| candidate == tag),
                    Value::Array(tags) => tags.iter().any(|tag| {
                        matches!(tag, Value::String(tag) if only_for.iter().any(|candidate| candidate == tag))
                    }),
                    _ => false,
                };
                if !allowed {
                    return false;
                }
            }
            current = parent;
        }
        true
    }

    // --- Deferred work ---

    /// One coalesced query evaluation. The disposed flag is re-checked
    /// before the result lands so nothing writes into torn-down state.
    pub(crate) fn run_query_slot(&mut self, slot: SlotId) {
        let comp = self.rt.slot_comp(slot);
        let Some(CompKind::Query { control, property, out, .. }) = self.rt.comp_kind(comp) else {
            self.rt.finish_eval(slot);
            return;
        };
        if !self.controls[control.0 as usize].alive {
            return;
        }
        let state = self.control(control);
        let (form, eval_node) = (state.form, state.eval_node);
        let scope = fact_for_property(property)
            .and_then(|fact| state.fact_scopes.get(&fact).copied())
            .unwrap_or(state.scope);
        let def = self.forms.definition(form);
        let Some(entry) = def.dynamic_for(property).cloned() else {
            self.rt.finish_eval(slot);
            return;
        };

        let registry = self.registry.clone();
        self.rt.begin(comp);
        let value = {
            let mut ctx = EvalContext {
                rt: &mut self.rt,
                schema: &mut self.schema,
                data: &mut self.data,
                diags: &mut self.diags,
                compiled: &mut self.compiled,
                node: eval_node,
                scope,
                entry_key: format!("{:?}", entry.property),
            };
            registry.evaluate(&entry.expr, &mut ctx)
        };
        self.rt.end(comp);

        if !self.rt.slot_disposed(slot) {
            self.rt.write(out, value);
            self.rt.finish_eval(slot);
        }
    }

    /// Default-value application and clear-on-hide. Runs deferred, so it
    /// observes only settled state: a batch that ends hidden clears (unless
    /// exempted), a batch that ends visible writes the default into an
    /// empty slot. Intermediate toggles inside a batch are never seen.
    pub(crate) fn run_effect(&mut self, comp: CompId, control: ControlId) {
        if !self.controls[control.0 as usize].alive {
            return;
        }
        let state = self.control(control);
        let (form, data_node) = (state.form, state.data_node);
        let Some(node) = data_node else {
            return;
        };
        let def = self.forms.definition(form);
        let hidden_cell = self.control(control).cells.get(&Fact::Hidden).copied();

        self.rt.begin(comp);
        let hidden = match hidden_cell {
            Some(cell) => truthy(&self.rt.read(cell)),
            None => false,
        };
        let default = self.effective_default(control, &def);
        let current = self.data.read_node(&mut self.rt, node);
        self.rt.end(comp);

        let field_type = self.schema.decl(self.data.schema_of(node)).field_type;
        if hidden {
            if !def.dont_clear_hidden && !current.is_null() {
                self.data.write_node(&mut self.rt, node, Value::Null);
            }
        } else if let Some(default) = default {
            if !default.is_null() && field_type.is_empty(&current) && !def.optional {
                self.data.write_node(&mut self.rt, node, default);
            }
        }
    }

    fn effective_default(&mut self, control: ControlId, def: &ControlDefinition) -> Option<Value> {
        if let Some(entry) = def.dynamic_for(DynamicProperty::DefaultValue) {
            let value = self.eval_entry(control, None, entry, Coercion::Raw);
            if !value.is_null() {
                return Some(value);
            }
        }
        if let Some(value) = &def.default_value {
            return Some(value.clone());
        }
        let node = self.control(control).data_node?;
        self.schema.decl(self.data.schema_of(node)).default_value.clone()
    }

    // --- Snapshots ---

    /// Compose the current snapshot for a control: static definition plus
    /// the live override of every dynamic property.
    pub fn snapshot(&mut self, control: ControlId) -> ControlState {
        let state = self.control(control);
        let (form, data_node, ctx) = (state.form, state.data_node, state.ctx);
        let def = self.forms.definition(form);

        let mut overrides = IndexMap::new();
        for entry in def.dynamic.clone() {
            let property = entry.property;
            if matches!(
                property,
                DynamicProperty::Visible | DynamicProperty::Readonly | DynamicProperty::Disabled
            ) {
                continue;
            }
            if overrides.contains_key(&property) {
                continue;
            }
            let value = if let Some(fact) = fact_for_property(property) {
                match self.control(control).cells.get(&fact).copied() {
                    Some(cell) => self.rt.peek(cell),
                    None => Value::Null,
                }
            } else if entry.expr.is_deferred() {
                match self.control(control).query.get(&property).copied() {
                    Some((_, cell)) => self.rt.peek(cell),
                    None => Value::Null,
                }
            } else {
                self.eval_entry(control, None, &entry, Coercion::Raw)
            };
            overrides.insert(property, value);
        }

        let peek_fact = |engine: &Self, fact: Fact| -> bool {
            engine
                .control(control)
                .cells
                .get(&fact)
                .map(|&cell| truthy(&engine.rt.peek(cell)))
                .unwrap_or(false)
        };
        let hidden = peek_fact(self, Fact::Hidden);
        let readonly = peek_fact(self, Fact::Readonly);
        let disabled = peek_fact(self, Fact::Disabled);

        let (field_options, schema_default) = match data_node {
            Some(node) => {
                let decl = self.schema.decl(self.data.schema_of(node));
                (decl.options.clone(), decl.default_value.clone())
            }
            None => (Vec::new(), None),
        };

        ControlState {
            definition: def.clone(),
            data_node: data_node.map(|node| self.data.node_id(node)),
            value: data_node.map(|node| self.value_of(node)).unwrap_or(Value::Null),
            hidden,
            readonly,
            disabled,
            display_only: ctx.display_only || def.display_only,
            inline: def.inline,
            field_options,
            schema_default,
            overrides,
        }
    }
}

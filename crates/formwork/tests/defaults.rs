//! Default-value application and clear-on-hide, including the settled-state
//! tie-break: a batch that ends hidden clears, a batch that ends visible
//! applies the default.

mod common;

use common::Harness;
use serde_json::json;

fn gated_default_form(extra: serde_json::Value) -> serde_json::Value {
    let mut control = json!({
        "field": "payload",
        "dynamic": [{
            "property": "visible",
            "expression": { "type": "FieldValue", "field": "gate", "value": true },
        }],
    });
    control
        .as_object_mut()
        .unwrap()
        .extend(extra.as_object().cloned().unwrap_or_default());
    json!({ "children": [{ "field": "gate" }, control] })
}

fn gated_schema() -> serde_json::Value {
    json!([
        { "field": "gate", "type": "bool" },
        { "field": "payload", "type": "string", "defaultValue": "x" },
    ])
}

#[test]
fn default_is_written_once_into_empty_visible_field() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({})),
        json!({ "gate": true }),
    );
    let control = harness.bind("payload", harness.child_form(1));
    assert_eq!(harness.value("payload"), json!("x"));

    // A present value is never overwritten by recomputation.
    harness.set("payload", json!("edited"));
    harness.set("gate", json!(true));
    assert_eq!(harness.value("payload"), json!("edited"));
    assert!(!harness.state(control).hidden);
}

#[test]
fn hidden_field_gets_no_default() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({})),
        json!({ "gate": false }),
    );
    let control = harness.bind("payload", harness.child_form(1));
    assert!(harness.state(control).hidden);
    assert_eq!(harness.value("payload"), json!(null));
}

#[test]
fn hiding_clears_the_value() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({})),
        json!({ "gate": true, "payload": "typed" }),
    );
    let control = harness.bind("payload", harness.child_form(1));
    assert_eq!(harness.value("payload"), json!("typed"));

    harness.set("gate", json!(false));
    assert!(harness.state(control).hidden);
    assert_eq!(harness.value("payload"), json!(null));

    // Unhiding re-applies the default into the now-empty slot.
    harness.set("gate", json!(true));
    assert_eq!(harness.value("payload"), json!("x"));
}

#[test]
fn dont_clear_hidden_keeps_the_value() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({ "dontClearHidden": true })),
        json!({ "gate": true, "payload": "typed" }),
    );
    let _control = harness.bind("payload", harness.child_form(1));
    harness.set("gate", json!(false));
    assert_eq!(harness.value("payload"), json!("typed"));
}

#[test]
fn optional_toggle_field_gets_no_default() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({ "optional": true })),
        json!({ "gate": true }),
    );
    let _control = harness.bind("payload", harness.child_form(1));
    assert_eq!(harness.value("payload"), json!(null));
}

#[test]
fn hide_then_unhide_in_one_batch_applies_the_default() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({})),
        json!({ "gate": true }),
    );
    let control = harness.bind("payload", harness.child_form(1));
    assert_eq!(harness.value("payload"), json!("x"));

    // Toggle off and back on inside one batch: only the settled state is
    // observed, so the value survives and the control stays visible.
    harness.stage("gate", json!(false));
    harness.stage("gate", json!(true));
    harness.settle();
    assert!(!harness.state(control).hidden);
    assert_eq!(harness.value("payload"), json!("x"));
}

#[test]
fn hide_within_batch_wins_when_batch_ends_hidden() {
    let mut harness = Harness::new(
        gated_schema(),
        gated_default_form(json!({})),
        json!({ "gate": true }),
    );
    let control = harness.bind("payload", harness.child_form(1));
    assert_eq!(harness.value("payload"), json!("x"));

    harness.stage("gate", json!(true));
    harness.stage("gate", json!(false));
    harness.settle();
    assert!(harness.state(control).hidden);
    assert_eq!(harness.value("payload"), json!(null));
}

#[test]
fn dynamic_default_value_expression_is_used() {
    let mut harness = Harness::new(
        json!([
            { "field": "name", "type": "string" },
            { "field": "slug", "type": "string" },
        ]),
        json!({
            "children": [
                { "field": "name" },
                {
                    "field": "slug",
                    "dynamic": [{
                        "property": "defaultValue",
                        "expression": { "type": "Jsonata", "expression": "$lowercase(name)" },
                    }],
                },
            ],
        }),
        json!({ "name": "Ada" }),
    );
    let _control = harness.bind("slug", harness.child_form(1));
    assert_eq!(harness.value("slug"), json!("ada"));

    // The default applies only while the slot is empty.
    harness.set("name", json!("Grace"));
    assert_eq!(harness.value("slug"), json!("ada"));
}

#[test]
fn generated_identifier_default_is_stable() {
    let mut harness = Harness::new(
        json!([{ "field": "id", "type": "id" }]),
        json!({
            "children": [{
                "field": "id",
                "dynamic": [{
                    "property": "defaultValue",
                    "expression": { "type": "UUID" },
                }],
            }],
        }),
        json!({}),
    );
    let _control = harness.bind("id", harness.child_form(0));
    let first = harness.value("id");
    assert!(matches!(&first, serde_json::Value::String(text) if !text.is_empty()));

    harness.settle();
    assert_eq!(harness.value("id"), first, "identifier must not regenerate");
}

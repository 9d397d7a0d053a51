//! Nested localisation splitter/merger.
//!
//! Clients send one flat payload; leaves marked `localized: true` inside
//! `object`/`array`/`blocks` fields must be split into a locale-invariant
//! `structure` (persisted once, in the main JSONB column) and per-locale
//! `values` (persisted in the i18n sidecar's `_localized` column).

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::field::{FieldDef, FieldType};

/// A structural template describing which leaves inside a field's value
/// are localised.
#[derive(Debug, Clone, PartialEq)]
pub enum LocSchema {
    /// This leaf itself is localised.
    Leaf,
    Object(BTreeMap<String, LocSchema>),
    Array(Box<LocSchema>),
    Blocks(BTreeMap<String, BTreeMap<String, LocSchema>>),
}

const I18N_SENTINEL_KEY: &str = "$i18n";

/// Build the localisation schema for a single top-level field. Returns
/// `None` when the field (and everything beneath it) carries no localised
/// leaves, in which case no split is necessary.
pub fn field_localization_schema(field: &FieldDef) -> Option<LocSchema> {
    if field.config.localized && !field.field_type.is_compound() {
        return Some(LocSchema::Leaf);
    }
    match field.field_type {
        FieldType::Object => {
            let children = field.config.fields.as_ref()?;
            let mut map = BTreeMap::new();
            for child in children {
                if let Some(loc) = field_localization_schema(child) {
                    map.insert(child.name.clone(), loc);
                }
            }
            if map.is_empty() {
                None
            } else {
                Some(LocSchema::Object(map))
            }
        }
        FieldType::Array => {
            let element = field.config.element.as_ref()?;
            field_localization_schema(element).map(|s| LocSchema::Array(Box::new(s)))
        }
        FieldType::Blocks => {
            let blocks = field.config.blocks.as_ref()?;
            let mut out = BTreeMap::new();
            for (block_type, fields) in blocks {
                let mut map = BTreeMap::new();
                for child in fields {
                    if let Some(loc) = field_localization_schema(child) {
                        map.insert(child.name.clone(), loc);
                    }
                }
                if !map.is_empty() {
                    out.insert(block_type.clone(), map);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(LocSchema::Blocks(out))
            }
        }
        _ => None,
    }
}

/// Split a mutation payload against its localisation schema, producing
/// `(structure, i18n_values)`. `structure` still has the same shape as
/// `value`, with localised leaves replaced by the `{"$i18n": true}`
/// sentinel; `i18n_values` holds only the localised leaves, at the same
/// paths they occupied in `value`.
pub fn split(value: &Value, schema: &LocSchema) -> (Value, Value) {
    match schema {
        LocSchema::Leaf => (json!({ I18N_SENTINEL_KEY: true }), value.clone()),
        LocSchema::Object(children) => {
            let mut structure = Map::new();
            let mut i18n = Map::new();
            if let Some(obj) = value.as_object() {
                for (key, v) in obj {
                    if let Some(child_schema) = children.get(key) {
                        let (s, i) = split(v, child_schema);
                        structure.insert(key.clone(), s);
                        if !is_empty(&i) {
                            i18n.insert(key.clone(), i);
                        }
                    } else {
                        structure.insert(key.clone(), v.clone());
                    }
                }
            }
            (Value::Object(structure), Value::Object(i18n))
        }
        LocSchema::Array(element_schema) => {
            let mut structure = Vec::new();
            let mut i18n = Vec::new();
            if let Some(arr) = value.as_array() {
                for item in arr {
                    let (s, i) = split(item, element_schema);
                    structure.push(s);
                    i18n.push(i);
                }
            }
            (Value::Array(structure), Value::Array(i18n))
        }
        LocSchema::Blocks(block_schemas) => {
            // `structure._tree` carries block identity/order verbatim;
            // `_values[blockId]` is split per that block's own schema.
            let tree = value.get("_tree").cloned().unwrap_or(Value::Null);
            let mut structure = Map::new();
            structure.insert("_tree".to_string(), tree);
            let mut structure_values = Map::new();
            let mut i18n_values = Map::new();
            if let Some(values) = value.get("_values").and_then(Value::as_object) {
                for (block_id, block_value) in values {
                    let block_type = block_value
                        .get("_blockType")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if let Some(fields_schema) = block_schemas.get(block_type) {
                        let object_schema = LocSchema::Object(fields_schema.clone());
                        let (s, i) = split(block_value, &object_schema);
                        structure_values.insert(block_id.clone(), s);
                        if !is_empty(&i) {
                            i18n_values.insert(block_id.clone(), i);
                        }
                    } else {
                        structure_values.insert(block_id.clone(), block_value.clone());
                    }
                }
            }
            structure.insert("_values".to_string(), Value::Object(structure_values));
            (Value::Object(structure), Value::Object(i18n_values))
        }
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Merge `structure` with `current`'s localised values, falling back to
/// `fallback`'s localised values for leaves `current` doesn't cover.
/// Reconstitutes the plain shape clients sent.
pub fn merge(structure: &Value, current: Option<&Value>, fallback: Option<&Value>, schema: &LocSchema) -> Value {
    match schema {
        LocSchema::Leaf => current
            .cloned()
            .or_else(|| fallback.cloned())
            .unwrap_or(Value::Null),
        LocSchema::Object(children) => {
            let mut out = Map::new();
            if let Some(obj) = structure.as_object() {
                for (key, v) in obj {
                    if let Some(child_schema) = children.get(key) {
                        let cur = current.and_then(|c| c.get(key));
                        let fb = fallback.and_then(|f| f.get(key));
                        out.insert(key.clone(), merge(v, cur, fb, child_schema));
                    } else {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
            Value::Object(out)
        }
        LocSchema::Array(element_schema) => {
            let mut out = Vec::new();
            if let Some(arr) = structure.as_array() {
                for (i, item) in arr.iter().enumerate() {
                    let cur = current.and_then(|c| c.as_array()).and_then(|a| a.get(i));
                    let fb = fallback.and_then(|f| f.as_array()).and_then(|a| a.get(i));
                    out.push(merge(item, cur, fb, element_schema));
                }
            }
            Value::Array(out)
        }
        LocSchema::Blocks(block_schemas) => {
            let tree = structure.get("_tree").cloned().unwrap_or(Value::Null);
            let mut values = Map::new();
            if let Some(structure_values) = structure.get("_values").and_then(Value::as_object) {
                for (block_id, block_structure) in structure_values {
                    let block_type = block_structure
                        .get("_blockType")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if let Some(fields_schema) = block_schemas.get(block_type) {
                        let object_schema = LocSchema::Object(fields_schema.clone());
                        let cur = current.and_then(|c| c.get(block_id));
                        let fb = fallback.and_then(|f| f.get(block_id));
                        values.insert(
                            block_id.clone(),
                            merge(block_structure, cur, fb, &object_schema),
                        );
                    } else {
                        values.insert(block_id.clone(), block_structure.clone());
                    }
                }
            }
            let mut out = Map::new();
            out.insert("_tree".to_string(), tree);
            out.insert("_values".to_string(), Value::Object(values));
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_split_produces_sentinel_and_value() {
        let (structure, i18n) = split(&json!("Morning"), &LocSchema::Leaf);
        assert_eq!(structure, json!({ "$i18n": true }));
        assert_eq!(i18n, json!("Morning"));
    }

    #[test]
    fn nested_object_round_trips_through_split_and_merge() {
        let schema = LocSchema::Object(
            [(
                "monday".to_string(),
                LocSchema::Object(
                    [
                        ("isOpen".to_string(), LocSchema::Object(BTreeMap::new())),
                        ("note".to_string(), LocSchema::Leaf),
                    ]
                    .into_iter()
                    .filter(|(_, s)| !matches!(s, LocSchema::Object(m) if m.is_empty()))
                    .collect(),
                ),
            )]
            .into_iter()
            .collect(),
        );
        let payload = json!({ "monday": { "isOpen": true, "note": "Morning" } });
        let (structure, i18n) = split(&payload, &schema);
        assert_eq!(
            structure,
            json!({ "monday": { "isOpen": true, "note": { "$i18n": true } } })
        );
        assert_eq!(i18n, json!({ "monday": { "note": "Morning" } }));

        let merged = merge(&structure, Some(&i18n), None, &schema);
        assert_eq!(merged, payload);
    }

    #[test]
    fn merge_falls_back_when_current_locale_misses_leaf() {
        let schema = LocSchema::Leaf;
        let merged = merge(&json!({ "$i18n": true }), None, Some(&json!("fallback")), &schema);
        assert_eq!(merged, json!("fallback"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_leaf_split_then_merge_recovers_any_string(s in ".*") {
                let value = json!(s);
                let (structure, values) = split(&value, &LocSchema::Leaf);
                let merged = merge(&structure, Some(&values), None, &LocSchema::Leaf);
                prop_assert_eq!(merged, value);
            }

            #[test]
            fn prop_object_split_then_merge_recovers_localized_and_plain_fields(
                title in ".*",
                views in 0i64..10_000,
            ) {
                let schema = LocSchema::Object(
                    [("title".to_string(), LocSchema::Leaf)].into_iter().collect(),
                );
                let value = json!({ "title": title, "views": views });
                let (structure, i18n) = split(&value, &schema);
                let merged = merge(&structure, Some(&i18n), None, &schema);
                prop_assert_eq!(merged["title"].as_str().unwrap(), title);
                prop_assert_eq!(merged["views"].as_i64().unwrap(), views);
            }

            #[test]
            fn prop_leaf_merge_falls_back_to_other_locale_when_current_is_missing(fallback in ".*") {
                let merged = merge(&json!({ "$i18n": true }), None, Some(&json!(fallback)), &LocSchema::Leaf);
                prop_assert_eq!(merged.as_str().unwrap(), fallback);
            }
        }
    }
}

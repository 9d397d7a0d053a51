//! Edge case tests for headway-core: schema compilation, localisation
//! splitting, and migration diffing under boundary-condition inputs.

use headway_core::localization::{field_localization_schema, merge, split};
use headway_core::migration::{diff_snapshots, generate_migration, snapshot_schema};
use headway_core::{CollectionSchema, FieldDef, FieldType, RelationKind, Schema};
use serde_json::{json, Value};

fn blog_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_collection(CollectionSchema::new(
            "posts",
            vec![
                FieldDef::new("title", FieldType::Text).required().localized(),
                FieldDef::new("body", FieldType::RichText).localized(),
                FieldDef::new("views", FieldType::Number),
                FieldDef::relation("author", RelationKind::BelongsTo, "users"),
            ],
        ))
        .expect("schema compiles");
    schema
}

// ============================================================================
// Schema edge cases
// ============================================================================

#[test]
fn duplicate_collection_name_is_rejected() {
    let mut schema = blog_schema();
    let dup = CollectionSchema::new("posts", vec![FieldDef::new("x", FieldType::Text)]);
    assert!(schema.add_collection(dup).is_err());
}

#[test]
fn unknown_collection_lookup_fails() {
    let schema = blog_schema();
    assert!(schema.collection("comments").is_err());
}

#[test]
fn belongs_to_relation_gets_an_fk_column() {
    let schema = blog_schema();
    let posts = schema.collection("posts").unwrap();
    let columns: Vec<String> = posts.main_columns().into_iter().map(|col| col.name).collect();
    assert!(columns.iter().any(|c| c == "authorId"));
}

// ============================================================================
// Localisation edge cases
// ============================================================================

#[test]
fn non_localized_field_has_no_localisation_schema() {
    let views = FieldDef::new("views", FieldType::Number);
    assert!(field_localization_schema(&views).is_none());
}

#[test]
fn split_then_merge_recovers_original_value_for_one_locale() {
    let title = FieldDef::new("title", FieldType::Text).required().localized();
    let loc_schema = field_localization_schema(&title).expect("title is localized");

    let value = json!("Hello, world");
    let (structure, values) = split(&value, &loc_schema);

    // A leaf field's structure is just the `$i18n` sentinel; the actual
    // value lives entirely in the per-locale side.
    assert_eq!(values, value);
    let merged = merge(&structure, Some(&values), None, &loc_schema);
    assert_eq!(merged, value);
}

#[test]
fn merge_falls_back_when_current_locale_missing() {
    let title = FieldDef::new("title", FieldType::Text).required().localized();
    let loc_schema = field_localization_schema(&title).expect("title is localized");

    let fallback_value = json!("Bonjour");
    let merged = merge(&Value::Null, None, Some(&fallback_value), &loc_schema);
    assert_eq!(merged, fallback_value);
}

// ============================================================================
// Migration diffing edge cases
// ============================================================================

#[test]
fn identical_schemas_produce_no_migration() {
    let schema = blog_schema();
    let snapshot = snapshot_schema(&schema);
    assert!(diff_snapshots(&snapshot, &snapshot).is_empty());
    assert!(generate_migration(&snapshot, &snapshot, "20260101000000", "noop").is_none());
}

#[test]
fn adding_a_column_produces_a_single_set_op() {
    let before = snapshot_schema(&blog_schema());

    let mut schema = blog_schema();
    let mut posts = schema.collections.get("posts").unwrap().clone();
    posts.fields.push(FieldDef::new("subtitle", FieldType::Text));
    schema.collections.insert("posts".to_string(), posts);
    let after = snapshot_schema(&schema);

    let ops = diff_snapshots(&before, &after);
    assert_eq!(ops.len(), 1);

    let migration = generate_migration(&before, &after, "20260101000000", "add_subtitle")
        .expect("a real diff produces a migration");
    assert!(!migration.up.is_empty());
    assert!(!migration.down.is_empty());
    assert_eq!(migration.id, "20260101000000_add_subtitle");
}

#[test]
fn empty_schema_has_no_tables() {
    let snapshot = snapshot_schema(&Schema::default());
    assert!(snapshot.tables.is_empty());
}

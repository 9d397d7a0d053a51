//! The schema compiler: turns collection/global definitions into table
//! specs, validators and introspection metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::AccessRules;
use crate::error::{Error, Result};
use crate::field::{check_collision, ColumnSpec, FieldDef, FieldMeta};
use crate::hooks::HookSet;
use crate::localization::LocSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub stages: Vec<String>,
    pub initial_stage: String,
    /// stage -> the stages reachable from it.
    pub transitions: BTreeMap<String, Vec<String>>,
}

impl WorkflowConfig {
    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.stages.contains(&to.to_string())
            && self
                .transitions
                .get(from)
                .map(|allowed| allowed.iter().any(|s| s == to))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchableConfig {
    Disabled,
    Enabled {
        title_field: Option<String>,
        /// field names folded into the auto-generated "k: v, ..." content
        /// string when no custom content extractor is configured downstream.
        content_fields: Option<Vec<String>>,
    },
}

impl Default for SearchableConfig {
    fn default() -> Self {
        SearchableConfig::Enabled {
            title_field: None,
            content_fields: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CollectionOptions {
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default)]
    pub versioning: bool,
    pub workflow: Option<WorkflowConfig>,
}

fn default_true() -> bool {
    true
}

/// A collection definition plus the compiled view of it.
///
/// Not `Serialize`/`Deserialize`: access rules and hooks hold callbacks.
/// The migration generator works off `migration::SchemaSnapshot`, a
/// separate plain-data projection (see `migration.rs`), not this struct.
#[derive(Clone)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub options: CollectionOptions,
    pub access: AccessRules,
    pub hooks: HookSet,
    pub indexes: Vec<IndexSpec>,
    pub searchable: Option<SearchableConfig>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            options: CollectionOptions::default(),
            access: AccessRules::default(),
            hooks: HookSet::default(),
            indexes: Vec::new(),
            searchable: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_i18n(&self) -> bool {
        self.fields.iter().any(|f| f.config.localized)
    }

    pub fn main_columns(&self) -> Vec<ColumnSpec> {
        self.fields
            .iter()
            .filter(|f| !f.config.localized)
            .filter_map(|f| f.to_column())
            .collect()
    }

    pub fn i18n_columns(&self) -> Vec<ColumnSpec> {
        self.fields
            .iter()
            .filter(|f| f.config.localized)
            .filter_map(|f| f.to_column())
            .collect()
    }

    pub fn relations(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| matches!(f.field_type, crate::field::FieldType::Relation))
    }

    pub fn metadata(&self) -> Vec<FieldMeta> {
        self.fields.iter().map(|f| f.metadata()).collect()
    }

    /// Structural template of which leaves are localised, used by the
    /// nested localisation splitter.
    pub fn localization_schema(&self) -> BTreeMap<String, LocSchema> {
        let mut out = BTreeMap::new();
        for f in &self.fields {
            if let Some(loc) = crate::localization::field_localization_schema(f) {
                out.insert(f.name.clone(), loc);
            }
        }
        out
    }

    /// Validate a merged (main + localised) payload. `partial` relaxes
    /// required-field checks for `updateById`/`updateMany`.
    pub fn validate_payload(&self, payload: &Value, partial: bool) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::BadRequest("payload must be a JSON object".to_string()))?;
        let mut errors = Vec::new();
        for field in &self.fields {
            if !field.config.input {
                continue;
            }
            let value = obj.get(&field.name);
            if let Err(e) = field.validate(value, partial) {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Preprocess a payload: map relation field names to their FK column
    /// name (`author` -> `authorId`) ahead of validation, per §4.1.
    pub fn normalize_relation_names(&self, payload: &mut serde_json::Map<String, Value>) {
        for rel in self.relations() {
            if let Some(value) = payload.remove(&rel.name) {
                if let Some(col) = rel.column_name() {
                    payload.insert(col, value);
                } else {
                    // hasMany: no column, re-insert under the field name so
                    // nested-mutation handling downstream can still see it.
                    payload.insert(rel.name.clone(), value);
                }
            }
        }
    }

    pub fn validate_no_collisions(&self) -> Result<()> {
        for field in &self.fields {
            check_collision(&field.name)?;
        }
        Ok(())
    }

    pub fn validate_field_nesting(&self) -> Result<()> {
        fn check(field: &FieldDef) -> Result<()> {
            use crate::field::FieldType::*;
            match field.field_type {
                Array => {
                    let element = field.config.element.as_ref().ok_or_else(|| {
                        Error::InvalidFieldConfig(format!(
                            "array field '{}' has no element definition",
                            field.name
                        ))
                    })?;
                    if field.config.localized && element.field_type != Object {
                        return Err(Error::InvalidFieldConfig(format!(
                            "array field '{}' cannot be localized unless its element is an object",
                            field.name
                        )));
                    }
                    check(element)
                }
                Object => {
                    let children = field.config.fields.as_ref().ok_or_else(|| {
                        Error::InvalidFieldConfig(format!(
                            "object field '{}' has no child fields",
                            field.name
                        ))
                    })?;
                    children.iter().try_for_each(check)
                }
                Blocks => {
                    let blocks = field.config.blocks.as_ref().ok_or_else(|| {
                        Error::InvalidFieldConfig(format!(
                            "blocks field '{}' has no block types",
                            field.name
                        ))
                    })?;
                    blocks.values().flatten().try_for_each(check)
                }
                _ => Ok(()),
            }
        }
        self.fields.iter().try_for_each(check)
    }
}

/// A global is a singleton collection: same field handling and sidecars,
/// addressed by name instead of by id.
#[derive(Clone)]
pub struct GlobalSchema {
    pub name: String,
    pub collection: CollectionSchema,
}

impl GlobalSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            collection: CollectionSchema::new(name, fields),
        }
    }
}

/// The full compiled schema: every collection and global known to the CMS
/// instance, plus the schema version used for migration diffing.
#[derive(Clone, Default)]
pub struct Schema {
    pub collections: BTreeMap<String, CollectionSchema>,
    pub globals: BTreeMap<String, GlobalSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&mut self, schema: CollectionSchema) -> Result<()> {
        schema.validate_no_collisions()?;
        schema.validate_field_nesting()?;
        self.collections.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn add_global(&mut self, schema: GlobalSchema) -> Result<()> {
        schema.collection.validate_no_collisions()?;
        schema.collection.validate_field_nesting()?;
        self.globals.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    pub fn global(&self, name: &str) -> Result<&GlobalSchema> {
        self.globals
            .get(name)
            .ok_or_else(|| Error::GlobalNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDef, FieldType};

    #[test]
    fn collision_rejected_at_add_time() {
        let mut schema = Schema::new();
        let bad = CollectionSchema::new("posts", vec![FieldDef::new("createdAt", FieldType::Text)]);
        assert!(schema.add_collection(bad).is_err());
    }

    #[test]
    fn workflow_transitions_are_directional() {
        let workflow = WorkflowConfig {
            stages: vec!["draft".into(), "published".into()],
            initial_stage: "draft".into(),
            transitions: [("draft".to_string(), vec!["published".to_string()])]
                .into_iter()
                .collect(),
        };
        assert!(workflow.can_transition("draft", "published"));
        assert!(!workflow.can_transition("published", "draft"));
    }

    #[test]
    fn relation_name_normalisation_maps_to_fk_column() {
        let schema = CollectionSchema::new(
            "posts",
            vec![FieldDef::relation(
                "author",
                crate::field::RelationKind::BelongsTo,
                "users",
            )],
        );
        let mut payload = serde_json::Map::new();
        payload.insert("author".to_string(), Value::String("u1".into()));
        schema.normalize_relation_names(&mut payload);
        assert_eq!(payload.get("authorId"), Some(&Value::String("u1".into())));
        assert!(payload.get("author").is_none());
    }
}

//! Field registry: the closed variant over field kinds and the capability
//! set (`to_column`, `validate`, `operators`, `metadata`) each kind exposes.
//!
//! New field kinds are added by extending `FieldType` and the matches in
//! this file; there is no open trait-object registry because the field set
//! is closed and known at compile time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, FieldError};
use crate::query::{ColumnOperator, ContextualOperators, JsonbOperator};

/// Closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Date,
    DateTime,
    Time,
    Select,
    Json,
    Object,
    Array,
    Blocks,
    Relation,
    Upload,
    RichText,
    Url,
    Email,
}

impl FieldType {
    /// Whether this kind persists its own column, vs. only existing as a
    /// virtual relation (hasMany has no column on this table).
    pub fn is_compound(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::Array | FieldType::Blocks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasMany,
}

/// Per-field configuration, shared by every field kind; compound- and
/// relation-specific settings are optional and ignored by kinds that don't
/// use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub localized: bool,
    #[serde(default = "default_true")]
    pub input: bool,
    #[serde(default = "default_true")]
    pub output: bool,
    pub label: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    #[serde(default)]
    pub unique: bool,

    /// `relation` only.
    pub relation_target: Option<String>,
    pub relation_kind: Option<RelationKind>,

    /// `select` only.
    pub options: Option<Vec<String>>,

    /// `object` only: child field map, in declaration order.
    pub fields: Option<Vec<FieldDef>>,
    /// `array` only: element field definition (itself may be compound).
    pub element: Option<Box<FieldDef>>,
    /// `blocks` only: block-type name to its field map.
    pub blocks: Option<BTreeMap<String, Vec<FieldDef>>>,
}

fn default_true() -> bool {
    true
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            required: false,
            nullable: false,
            localized: false,
            input: true,
            output: true,
            label: None,
            description: None,
            default: None,
            unique: false,
            relation_target: None,
            relation_kind: None,
            options: None,
            fields: None,
            element: None,
            blocks: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(flatten)]
    pub config: FieldConfig,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            config: FieldConfig::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.config.required = true;
        self
    }

    pub fn localized(mut self) -> Self {
        self.config.localized = true;
        self
    }

    pub fn relation(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        let mut f = Self::new(name, FieldType::Relation);
        f.config.relation_kind = Some(kind);
        f.config.relation_target = Some(target.into());
        f
    }

    /// Column name as persisted; relation fields materialise as `<name>Id`
    /// for `belongsTo`, nothing for `hasMany`.
    pub fn column_name(&self) -> Option<String> {
        match (self.field_type, self.config.relation_kind) {
            (FieldType::Relation, Some(RelationKind::HasMany)) => None,
            (FieldType::Relation, _) => Some(format!("{}Id", self.name)),
            _ => Some(self.name.clone()),
        }
    }

    pub fn to_column(&self) -> Option<ColumnSpec> {
        let name = self.column_name()?;
        let sql_type = match self.field_type {
            FieldType::Text | FieldType::Textarea | FieldType::Select | FieldType::Url
            | FieldType::Email | FieldType::Upload | FieldType::RichText => "TEXT",
            FieldType::Number => "DOUBLE PRECISION",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::DateTime => "TIMESTAMPTZ",
            FieldType::Time => "TIME",
            FieldType::Json | FieldType::Object | FieldType::Array | FieldType::Blocks => "JSONB",
            FieldType::Relation => "TEXT",
        };
        Some(ColumnSpec {
            name,
            sql_type: sql_type.to_string(),
            not_null: self.config.required && !self.config.nullable,
            unique: self.config.unique,
            default: self.config.default.clone(),
            references: self.config.relation_target.clone().filter(|_| {
                matches!(self.config.relation_kind, Some(RelationKind::BelongsTo))
            }),
        })
    }

    /// Validate a single value against this field's rules. `partial`
    /// disables the required check (used by the update validator).
    pub fn validate(&self, value: Option<&Value>, partial: bool) -> std::result::Result<(), FieldError> {
        match value {
            None | Some(Value::Null) => {
                if self.config.required && !partial && self.config.default.is_none() {
                    return Err(FieldError::new(&self.name, "is required"));
                }
                Ok(())
            }
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, v: &Value) -> std::result::Result<(), FieldError> {
        let ok = match self.field_type {
            FieldType::Text | FieldType::Textarea | FieldType::Url | FieldType::Email
            | FieldType::RichText | FieldType::Upload => v.is_string(),
            FieldType::Select => {
                v.is_string()
                    && self
                        .config
                        .options
                        .as_ref()
                        .map(|opts| opts.iter().any(|o| Some(o.as_str()) == v.as_str()))
                        .unwrap_or(true)
            }
            FieldType::Number => v.is_number(),
            FieldType::Boolean => v.is_boolean(),
            FieldType::Date | FieldType::DateTime | FieldType::Time => v.is_string(),
            FieldType::Json | FieldType::Object | FieldType::Blocks => v.is_object(),
            FieldType::Array => v.is_array(),
            FieldType::Relation => v.is_string() || v.is_object() || v.is_null(),
        };
        if ok {
            Ok(())
        } else {
            Err(FieldError::new(
                &self.name,
                format!("expected a value of type {:?}", self.field_type),
            ))
        }
    }

    pub fn operators(&self) -> ContextualOperators {
        let column = match self.field_type {
            FieldType::Text | FieldType::Textarea | FieldType::Select | FieldType::Url
            | FieldType::Email | FieldType::RichText | FieldType::Upload | FieldType::Relation => {
                vec![
                    ColumnOperator::Eq,
                    ColumnOperator::Ne,
                    ColumnOperator::In,
                    ColumnOperator::NotIn,
                    ColumnOperator::Like,
                    ColumnOperator::Ilike,
                    ColumnOperator::Contains,
                    ColumnOperator::StartsWith,
                    ColumnOperator::EndsWith,
                    ColumnOperator::IsNull,
                    ColumnOperator::IsNotNull,
                ]
            }
            FieldType::Number | FieldType::Date | FieldType::DateTime | FieldType::Time => vec![
                ColumnOperator::Eq,
                ColumnOperator::Ne,
                ColumnOperator::Gt,
                ColumnOperator::Gte,
                ColumnOperator::Lt,
                ColumnOperator::Lte,
                ColumnOperator::Between,
                ColumnOperator::In,
                ColumnOperator::NotIn,
            ],
            FieldType::Boolean => vec![ColumnOperator::Eq, ColumnOperator::Ne],
            FieldType::Json | FieldType::Object | FieldType::Blocks => vec![
                ColumnOperator::IsNull,
                ColumnOperator::IsNotNull,
            ],
            FieldType::Array => vec![ColumnOperator::IsEmpty, ColumnOperator::IsNotEmpty],
        };
        let jsonb = match self.field_type {
            FieldType::Json | FieldType::Object | FieldType::Blocks => vec![
                JsonbOperator::HasKey,
                JsonbOperator::HasAllKeys,
                JsonbOperator::HasAnyKeys,
                JsonbOperator::PathEquals,
                JsonbOperator::PathExists,
                JsonbOperator::Contains,
                JsonbOperator::ContainedBy,
            ],
            FieldType::Array => vec![
                JsonbOperator::ContainsAll,
                JsonbOperator::ContainsAny,
                JsonbOperator::Length,
            ],
            _ => Vec::new(),
        };
        ContextualOperators { column, jsonb }
    }

    pub fn metadata(&self) -> FieldMeta {
        FieldMeta {
            name: self.name.clone(),
            field_type: self.field_type,
            required: self.config.required,
            localized: self.config.localized,
            label: self.config.label.clone(),
            description: self.config.description.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub references: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub localized: bool,
    pub label: Option<String>,
    pub description: Option<String>,
}

/// Names synthesised by the schema compiler; a field may never collide with
/// one of these (see `Error::SchemaCollision`).
pub const SYNTHESISED_COLUMNS: &[&str] = &[
    "id",
    "createdAt",
    "updatedAt",
    "deletedAt",
    "parentId",
    "locale",
    "versionId",
    "versionNumber",
    "versionOperation",
    "versionUserId",
    "versionCreatedAt",
    "versionStage",
];

pub fn check_collision(name: &str) -> std::result::Result<(), Error> {
    if SYNTHESISED_COLUMNS.contains(&name) {
        Err(Error::SchemaCollision {
            field: name.to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_field_rejects_missing_value() {
        let field = FieldDef::new("title", FieldType::Text).required();
        assert!(field.validate(None, false).is_err());
        assert!(field.validate(None, true).is_ok());
        assert!(field.validate(Some(&Value::String("ok".into())), false).is_ok());
    }

    #[test]
    fn relation_column_name_depends_on_kind() {
        let belongs_to = FieldDef::relation("author", RelationKind::BelongsTo, "users");
        assert_eq!(belongs_to.column_name(), Some("authorId".to_string()));

        let has_many = FieldDef::relation("comments", RelationKind::HasMany, "comments");
        assert_eq!(has_many.column_name(), None);
    }

    #[test]
    fn collision_with_synthesised_column_is_rejected() {
        assert!(check_collision("createdAt").is_err());
        assert!(check_collision("title").is_ok());
    }
}

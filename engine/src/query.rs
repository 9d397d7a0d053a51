//! The `Where` predicate DSL and its compiler.
//!
//! Compilation never touches a connection: it produces a `CompiledWhere`,
//! a parameterised SQL fragment plus the bind values in order, that the
//! `Db` adapter executes. Field resolution (main column vs. i18n sidecar
//! with optional fallback COALESCE) is encapsulated in `FieldResolver` so
//! the same compiler serves `find`, `updateMany`, `deleteMany` and
//! aggregate population.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::CollectionSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Like,
    Ilike,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonbOperator {
    HasKey,
    HasAllKeys,
    HasAnyKeys,
    PathEquals,
    PathExists,
    Contains,
    ContainedBy,
    ContainsAll,
    ContainsAny,
    Length,
}

#[derive(Debug, Clone, Default)]
pub struct ContextualOperators {
    pub column: Vec<ColumnOperator>,
    pub jsonb: Vec<JsonbOperator>,
}

/// A recursive predicate tree, deserialised directly off the client's
/// filter JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Where {
    And { and: Vec<Where> },
    Or { or: Vec<Where> },
    Not { not: Box<Where> },
    Field(std::collections::BTreeMap<String, Predicate>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    Scalar(Value),
    Ops(std::collections::BTreeMap<String, Value>),
}

/// One bound parameter plus the SQL text it produced, accumulated in order
/// so the adapter can issue a single parameterised statement.
#[derive(Debug, Clone, Default)]
pub struct CompiledWhere {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledWhere {
    fn leaf(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }

    fn combine(parts: Vec<CompiledWhere>, joiner: &str) -> Self {
        if parts.is_empty() {
            return CompiledWhere::leaf("TRUE".to_string(), Vec::new());
        }
        let mut params = Vec::new();
        let mut frags = Vec::new();
        for mut p in parts {
            frags.push(format!("({})", p.sql));
            params.append(&mut p.params);
        }
        CompiledWhere {
            sql: frags.join(joiner),
            params,
        }
    }

    /// AND this predicate with another (used to splice in access-rule
    /// predicates and the soft-delete filter).
    pub fn and(self, other: CompiledWhere) -> CompiledWhere {
        CompiledWhere::combine(vec![self, other], " AND ")
    }
}

/// Resolves a field name to the SQL expression referencing either the main
/// table column or a COALESCE across the current/fallback i18n sidecars.
pub struct FieldResolver<'a> {
    pub schema: &'a CollectionSchema,
    pub main_alias: &'a str,
    pub i18n_alias: &'a str,
    pub i18n_fallback_alias: Option<&'a str>,
}

impl<'a> FieldResolver<'a> {
    fn resolve_column(&self, field: &str) -> Result<String> {
        let def = self
            .schema
            .field(field)
            .ok_or_else(|| Error::BadRequest(format!("unknown field '{field}'", field = field)))?;
        let column = def
            .column_name()
            .ok_or_else(|| Error::BadRequest(format!("field '{field}' has no column")))?;
        if def.config.localized {
            match self.i18n_fallback_alias {
                Some(fallback) => Ok(format!(
                    "COALESCE({cur}.\"{col}\", {fb}.\"{col}\")",
                    cur = self.i18n_alias,
                    fb = fallback,
                    col = column
                )),
                None => Ok(format!("{}.\"{}\"", self.i18n_alias, column)),
            }
        } else {
            Ok(format!("{}.\"{}\"", self.main_alias, column))
        }
    }
}

fn placeholder(idx: usize) -> String {
    format!("${idx}", idx = idx)
}

/// Compile a `Where` tree into a parameterised fragment. `start_index` is
/// the next free `$n` placeholder (postgres-style, 1-based).
pub fn compile_where(resolver: &FieldResolver, where_: &Where, start_index: usize) -> Result<CompiledWhere> {
    let mut next = start_index;
    compile_node(resolver, where_, &mut next)
}

fn compile_node(resolver: &FieldResolver, node: &Where, next: &mut usize) -> Result<CompiledWhere> {
    match node {
        Where::And { and } => {
            let mut parts = Vec::with_capacity(and.len());
            for w in and {
                parts.push(compile_node(resolver, w, next)?);
            }
            Ok(CompiledWhere::combine(parts, " AND "))
        }
        Where::Or { or } => {
            let mut parts = Vec::with_capacity(or.len());
            for w in or {
                parts.push(compile_node(resolver, w, next)?);
            }
            Ok(CompiledWhere::combine(parts, " OR "))
        }
        Where::Not { not } => {
            let inner = compile_node(resolver, not, next)?;
            Ok(CompiledWhere::leaf(format!("NOT ({})", inner.sql), inner.params))
        }
        Where::Field(map) => {
            let mut parts = Vec::with_capacity(map.len());
            for (field, predicate) in map {
                parts.push(compile_predicate(resolver, field, predicate, next)?);
            }
            Ok(CompiledWhere::combine(parts, " AND "))
        }
    }
}

fn compile_predicate(
    resolver: &FieldResolver,
    field: &str,
    predicate: &Predicate,
    next: &mut usize,
) -> Result<CompiledWhere> {
    let column = resolver.resolve_column(field)?;
    match predicate {
        Predicate::Scalar(v) => compile_op(&column, "eq", v, next),
        Predicate::Ops(ops) => {
            let mut parts = Vec::with_capacity(ops.len());
            for (op, arg) in ops {
                parts.push(compile_op(&column, op, arg, next)?);
            }
            Ok(CompiledWhere::combine(parts, " AND "))
        }
    }
}

fn compile_op(column: &str, op: &str, arg: &Value, next: &mut usize) -> Result<CompiledWhere> {
    macro_rules! bind {
        ($sql:expr, $val:expr) => {{
            let idx = *next;
            *next += 1;
            Ok(CompiledWhere::leaf(
                $sql.replace("{p}", &placeholder(idx)),
                vec![$val],
            ))
        }};
    }
    match op {
        "eq" => bind!(format!("{column} = {{p}}"), arg.clone()),
        "ne" => bind!(format!("{column} <> {{p}}"), arg.clone()),
        "gt" => bind!(format!("{column} > {{p}}"), arg.clone()),
        "gte" => bind!(format!("{column} >= {{p}}"), arg.clone()),
        "lt" => bind!(format!("{column} < {{p}}"), arg.clone()),
        "lte" => bind!(format!("{column} <= {{p}}"), arg.clone()),
        "like" => bind!(format!("{column} LIKE {{p}}"), arg.clone()),
        "ilike" => bind!(format!("{column} ILIKE {{p}}"), arg.clone()),
        "contains" => bind!(
            format!("{column} ILIKE '%' || {{p}} || '%'"),
            arg.clone()
        ),
        "startsWith" => bind!(format!("{column} ILIKE {{p}} || '%'"), arg.clone()),
        "endsWith" => bind!(format!("{column} ILIKE '%' || {{p}}"), arg.clone()),
        "isNull" => Ok(CompiledWhere::leaf(format!("{column} IS NULL"), Vec::new())),
        "isNotNull" => Ok(CompiledWhere::leaf(format!("{column} IS NOT NULL"), Vec::new())),
        "isEmpty" => Ok(CompiledWhere::leaf(
            format!("jsonb_array_length({column}) = 0"),
            Vec::new(),
        )),
        "isNotEmpty" => Ok(CompiledWhere::leaf(
            format!("jsonb_array_length({column}) > 0"),
            Vec::new(),
        )),
        "in" | "notIn" => {
            let list = arg.as_array().ok_or_else(|| {
                Error::BadRequest(format!("operator '{op}' expects an array argument"))
            })?;
            let mut placeholders = Vec::with_capacity(list.len());
            let mut params = Vec::with_capacity(list.len());
            for v in list {
                let idx = *next;
                *next += 1;
                placeholders.push(placeholder(idx));
                params.push(v.clone());
            }
            let keyword = if op == "in" { "IN" } else { "NOT IN" };
            Ok(CompiledWhere::leaf(
                format!("{column} {keyword} ({})", placeholders.join(", ")),
                params,
            ))
        }
        "between" => {
            let pair = arg.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                Error::BadRequest("operator 'between' expects a two-element array".to_string())
            })?;
            let lo = *next;
            let hi = *next + 1;
            *next += 2;
            Ok(CompiledWhere::leaf(
                format!("{column} BETWEEN {} AND {}", placeholder(lo), placeholder(hi)),
                vec![pair[0].clone(), pair[1].clone()],
            ))
        }
        "hasKey" => bind!(format!("{column} ? {{p}}"), arg.clone()),
        "pathExists" => bind!(format!("{column} @? {{p}}::jsonpath"), arg.clone()),
        "pathEquals" => bind!(format!("{column} @@ {{p}}::jsonpath"), arg.clone()),
        "containedBy" => bind!(format!("{column} <@ {{p}}::jsonb"), arg.clone()),
        "hasAllKeys" => bind!(format!("{column} ?& {{p}}"), arg.clone()),
        "hasAnyKeys" => bind!(format!("{column} ?| {{p}}"), arg.clone()),
        "containsAll" | "containsAny" | "jsonbContains" => {
            bind!(format!("{column} @> {{p}}::jsonb"), arg.clone())
        }
        "length" => bind!(format!("jsonb_array_length({column}) = {{p}}"), arg.clone()),
        other => Err(Error::BadRequest(format!("unknown operator '{other}'"))),
    }
}

/// Order-by clause, resolved through the same field rule, with a stable
/// `id ASC` tiebreaker appended when the requested order isn't unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

pub fn compile_order_by(resolver: &FieldResolver, order: &[OrderBy]) -> Result<String> {
    let mut clauses = Vec::with_capacity(order.len() + 1);
    for o in order {
        let col = resolver.resolve_column(&o.field)?;
        clauses.push(format!("{} {}", col, if o.descending { "DESC" } else { "ASC" }));
    }
    clauses.push(format!("{}.\"id\" ASC", resolver.main_alias));
    Ok(clauses.join(", "))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDef, FieldType};
    use crate::schema::CollectionSchema;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "posts",
            vec![
                FieldDef::new("title", FieldType::Text).required(),
                FieldDef::new("body", FieldType::Text).localized(),
            ],
        )
    }

    #[test]
    fn compiles_simple_eq() {
        let schema = schema();
        let resolver = FieldResolver {
            schema: &schema,
            main_alias: "t",
            i18n_alias: "ti",
            i18n_fallback_alias: None,
        };
        let where_ = Where::Field(
            [("title".to_string(), Predicate::Scalar(Value::String("Hello".into())))]
                .into_iter()
                .collect(),
        );
        let compiled = compile_where(&resolver, &where_, 1).unwrap();
        assert_eq!(compiled.sql, "t.\"title\" = $1");
        assert_eq!(compiled.params, vec![Value::String("Hello".into())]);
    }

    #[test]
    fn localized_field_resolves_through_coalesce_fallback() {
        let schema = schema();
        let resolver = FieldResolver {
            schema: &schema,
            main_alias: "t",
            i18n_alias: "ti",
            i18n_fallback_alias: Some("tif"),
        };
        let where_ = Where::Field(
            [("body".to_string(), Predicate::Scalar(Value::String("x".into())))]
                .into_iter()
                .collect(),
        );
        let compiled = compile_where(&resolver, &where_, 1).unwrap();
        assert!(compiled.sql.contains("COALESCE(ti.\"body\", tif.\"body\")"));
    }

    #[test]
    fn and_or_not_compose() {
        let schema = schema();
        let resolver = FieldResolver {
            schema: &schema,
            main_alias: "t",
            i18n_alias: "ti",
            i18n_fallback_alias: None,
        };
        let where_ = Where::Not {
            not: Box::new(Where::And {
                and: vec![
                    Where::Field(
                        [("title".to_string(), Predicate::Scalar(Value::String("a".into())))]
                            .into_iter()
                            .collect(),
                    ),
                    Where::Or {
                        or: vec![Where::Field(
                            [("title".to_string(), Predicate::Scalar(Value::String("b".into())))]
                                .into_iter()
                                .collect(),
                        )],
                    },
                ],
            }),
        };
        let compiled = compile_where(&resolver, &where_, 1).unwrap();
        assert!(compiled.sql.starts_with("NOT ("));
        assert_eq!(compiled.params.len(), 2);
    }
}

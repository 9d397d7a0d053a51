//! Migration generator: schema snapshotting, operation
//! diffing, and forward/backward SQL synthesis. The runner that tracks
//! applied batches and actually executes these statements against a live
//! database lives in the server crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::ColumnSpec;
use crate::schema::Schema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSnapshot {
    pub sql_type: String,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub references: Option<String>,
}

impl From<&ColumnSpec> for ColumnSnapshot {
    fn from(c: &ColumnSpec) -> Self {
        Self {
            sql_type: c.sql_type.clone(),
            not_null: c.not_null,
            unique: c.unique,
            default: c.default.clone(),
            references: c.references.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TableSnapshot {
    pub columns: BTreeMap<String, ColumnSnapshot>,
}

/// A canonical, deterministically-ordered (`BTreeMap`) projection of a
/// compiled schema: tables and their columns. This is the JSON form the
/// generator diffs, distinct from the live `Schema` (which holds closures
/// and can't be serialised).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSnapshot>,
}

const SYNTHESISED_MAIN: &[(&str, &str, bool)] = &[
    ("id", "TEXT", true),
    ("createdAt", "TIMESTAMPTZ", false),
    ("updatedAt", "TIMESTAMPTZ", false),
    ("deletedAt", "TIMESTAMPTZ", false),
];

fn table_from_columns(columns: impl Iterator<Item = ColumnSpec>) -> TableSnapshot {
    let mut table = TableSnapshot::default();
    for col in columns {
        table.columns.insert(col.name.clone(), ColumnSnapshot::from(&col));
    }
    table
}

/// Produce the canonical snapshot of the schema's main, i18n, versions and
/// versions-i18n tables.
pub fn snapshot_schema(schema: &Schema) -> SchemaSnapshot {
    let mut tables = BTreeMap::new();

    for collection in schema.collections.values() {
        let mut main = table_from_columns(collection.main_columns().into_iter());
        main.columns.insert(
            "id".to_string(),
            ColumnSnapshot {
                sql_type: "TEXT".to_string(),
                not_null: true,
                unique: true,
                default: None,
                references: None,
            },
        );
        if collection.options.timestamps {
            for (name, sql_type, not_null) in &SYNTHESISED_MAIN[1..] {
                main.columns.insert(
                    name.to_string(),
                    ColumnSnapshot {
                        sql_type: sql_type.to_string(),
                        not_null: *not_null,
                        unique: false,
                        default: None,
                        references: None,
                    },
                );
            }
        }
        if collection.options.soft_delete {
            main.columns.insert(
                "deletedAt".to_string(),
                ColumnSnapshot {
                    sql_type: "TIMESTAMPTZ".to_string(),
                    not_null: false,
                    unique: false,
                    default: None,
                    references: None,
                },
            );
        }
        tables.insert(collection.name.clone(), main);

        if collection.has_i18n() {
            let mut i18n = table_from_columns(collection.i18n_columns().into_iter());
            i18n.columns.insert(
                "parentId".to_string(),
                ColumnSnapshot {
                    sql_type: "TEXT".to_string(),
                    not_null: true,
                    unique: false,
                    references: Some(collection.name.clone()),
                    default: None,
                },
            );
            i18n.columns.insert(
                "locale".to_string(),
                ColumnSnapshot {
                    sql_type: "TEXT".to_string(),
                    not_null: true,
                    unique: false,
                    default: None,
                    references: None,
                },
            );
            tables.insert(format!("{}_i18n", collection.name), i18n);
        }

        if collection.options.versioning {
            let mut versions = table_from_columns(collection.main_columns().into_iter());
            for (name, sql_type) in [
                ("versionId", "TEXT"),
                ("versionNumber", "BIGINT"),
                ("versionOperation", "TEXT"),
                ("versionUserId", "TEXT"),
                ("versionCreatedAt", "TIMESTAMPTZ"),
                ("versionStage", "TEXT"),
            ] {
                versions.columns.insert(
                    name.to_string(),
                    ColumnSnapshot {
                        sql_type: sql_type.to_string(),
                        not_null: name == "versionId" || name == "versionNumber",
                        unique: false,
                        default: None,
                        references: None,
                    },
                );
            }
            tables.insert(format!("{}_versions", collection.name), versions);

            if collection.has_i18n() {
                let versions_i18n = table_from_columns(collection.i18n_columns().into_iter());
                tables.insert(format!("{}_versions_i18n", collection.name), versions_i18n);
            }
        }
    }

    for global in schema.globals.values() {
        let main = table_from_columns(global.collection.main_columns().into_iter());
        tables.insert(global.name.clone(), main);
        if global.collection.has_i18n() {
            let i18n = table_from_columns(global.collection.i18n_columns().into_iter());
            tables.insert(format!("{}_i18n", global.name), i18n);
        }
    }

    SchemaSnapshot { tables }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchemaOp {
    Set { path: String, value: Value },
    Remove { path: String },
}

/// Diff two snapshots into a sequence of dotted-path `set`/`remove`
/// operations. An empty result means no migration should be emitted.
pub fn diff_snapshots(prev: &SchemaSnapshot, curr: &SchemaSnapshot) -> Vec<SchemaOp> {
    let mut ops = Vec::new();

    for (table, columns) in &curr.tables {
        match prev.tables.get(table) {
            None => ops.push(SchemaOp::Set {
                path: format!("tables.{table}"),
                value: serde_json::to_value(columns).unwrap(),
            }),
            Some(prev_table) => {
                for (col, spec) in &columns.columns {
                    if prev_table.columns.get(col) != Some(spec) {
                        ops.push(SchemaOp::Set {
                            path: format!("tables.{table}.columns.{col}"),
                            value: serde_json::to_value(spec).unwrap(),
                        });
                    }
                }
                for col in prev_table.columns.keys() {
                    if !columns.columns.contains_key(col) {
                        ops.push(SchemaOp::Remove {
                            path: format!("tables.{table}.columns.{col}"),
                        });
                    }
                }
            }
        }
    }
    for table in prev.tables.keys() {
        if !curr.tables.contains_key(table) {
            ops.push(SchemaOp::Remove {
                path: format!("tables.{table}"),
            });
        }
    }
    ops
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_ddl(name: &str, col: &ColumnSnapshot) -> String {
    let mut sql = format!("{} {}", quote_ident(name), col.sql_type);
    if col.not_null {
        sql.push_str(" NOT NULL");
    }
    if col.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(target) = &col.references {
        sql.push_str(&format!(
            " REFERENCES {}(\"id\") ON DELETE CASCADE",
            quote_ident(target)
        ));
    }
    sql
}

/// Forward and reverse SQL for a single operation, against the table state
/// `prev`/`curr` snapshot has it in. Constraint drops use `IF EXISTS`.
pub fn operation_sql(op: &SchemaOp, prev: &SchemaSnapshot, curr: &SchemaSnapshot) -> (Vec<String>, Vec<String>) {
    match op {
        SchemaOp::Set { path, value } => {
            let parts: Vec<&str> = path.split('.').collect();
            match parts.as_slice() {
                ["tables", table] => {
                    let table_snapshot: TableSnapshot = serde_json::from_value(value.clone()).unwrap();
                    let cols: Vec<String> = table_snapshot
                        .columns
                        .iter()
                        .map(|(n, c)| column_ddl(n, c))
                        .collect();
                    let up = vec![format!(
                        "CREATE TABLE IF NOT EXISTS {} ({})",
                        quote_ident(table),
                        cols.join(", ")
                    )];
                    let down = vec![format!("DROP TABLE IF EXISTS {}", quote_ident(table))];
                    (up, down)
                }
                ["tables", table, "columns", column] => {
                    let col: ColumnSnapshot = serde_json::from_value(value.clone()).unwrap();
                    let existed = prev
                        .tables
                        .get(*table)
                        .map(|t| t.columns.contains_key(*column))
                        .unwrap_or(false);
                    let up = vec![format!(
                        "ALTER TABLE {} {} COLUMN {}",
                        quote_ident(table),
                        if existed { "ALTER" } else { "ADD" },
                        column_ddl(column, &col)
                    )];
                    let down = if existed {
                        vec!["-- column alteration is not reversed automatically".to_string()]
                    } else {
                        vec![format!(
                            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                            quote_ident(table),
                            quote_ident(column)
                        )]
                    };
                    (up, down)
                }
                _ => (Vec::new(), Vec::new()),
            }
        }
        SchemaOp::Remove { path } => {
            let parts: Vec<&str> = path.split('.').collect();
            match parts.as_slice() {
                ["tables", table] => {
                    let up = vec![format!("DROP TABLE IF EXISTS {}", quote_ident(table))];
                    let down = curr
                        .tables
                        .get(*table)
                        .map(|t| {
                            let cols: Vec<String> =
                                t.columns.iter().map(|(n, c)| column_ddl(n, c)).collect();
                            vec![format!(
                                "CREATE TABLE IF NOT EXISTS {} ({})",
                                quote_ident(table),
                                cols.join(", ")
                            )]
                        })
                        .unwrap_or_default();
                    (up, down)
                }
                ["tables", table, "columns", column] => {
                    let up = vec![format!(
                        "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                        quote_ident(table),
                        quote_ident(column)
                    )];
                    let down = prev
                        .tables
                        .get(*table)
                        .and_then(|t| t.columns.get(*column))
                        .map(|c| vec![format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(table), column_ddl(column, c))])
                        .unwrap_or_default();
                    (up, down)
                }
                _ => (Vec::new(), Vec::new()),
            }
        }
    }
}

/// A generated migration file: `<14-digit timestamp>_<snake_case name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFile {
    pub id: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
    pub snapshot_path: String,
}

pub fn migration_id(timestamp14: &str, name: &str) -> String {
    format!("{timestamp14}_{name}")
}

/// Generate a migration file from the diff between two snapshots. Returns
/// `None` when the diff is empty (no migration to emit).
pub fn generate_migration(
    prev: &SchemaSnapshot,
    curr: &SchemaSnapshot,
    timestamp14: &str,
    name: &str,
) -> Option<MigrationFile> {
    let ops = diff_snapshots(prev, curr);
    if ops.is_empty() {
        return None;
    }
    let mut up = Vec::new();
    let mut down = Vec::new();
    for op in &ops {
        let (u, d) = operation_sql(op, prev, curr);
        up.extend(u);
        down.extend(d);
    }
    down.reverse();
    let id = migration_id(timestamp14, name);
    Some(MigrationFile {
        snapshot_path: format!("snapshots/{id}.json"),
        id,
        up,
        down,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(columns: &[(&str, &str)]) -> SchemaSnapshot {
        let mut table = TableSnapshot::default();
        for (name, sql_type) in columns {
            table.columns.insert(
                name.to_string(),
                ColumnSnapshot {
                    sql_type: sql_type.to_string(),
                    not_null: false,
                    unique: false,
                    default: None,
                    references: None,
                },
            );
        }
        let mut tables = BTreeMap::new();
        tables.insert("users".to_string(), table);
        SchemaSnapshot { tables }
    }

    #[test]
    fn empty_diff_when_schema_unchanged() {
        let s = snapshot(&[("id", "TEXT"), ("email", "TEXT")]);
        assert!(diff_snapshots(&s, &s).is_empty());
    }

    #[test]
    fn added_column_produces_set_op() {
        let prev = snapshot(&[("id", "TEXT"), ("email", "TEXT")]);
        let curr = snapshot(&[("id", "TEXT"), ("email", "TEXT"), ("name", "TEXT")]);
        let ops = diff_snapshots(&prev, &curr);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], SchemaOp::Set { path, .. } if path == "tables.users.columns.name"));
    }

    #[test]
    fn migration_round_trip_restores_prior_snapshot() {
        let prev = snapshot(&[("id", "TEXT"), ("email", "TEXT")]);
        let curr = snapshot(&[("id", "TEXT"), ("email", "TEXT"), ("name", "TEXT")]);
        let migration = generate_migration(&prev, &curr, "00000000000001", "add_name").unwrap();
        assert!(migration.up[0].contains("ADD COLUMN"));
        assert!(migration.down[0].contains("DROP COLUMN IF EXISTS"));
    }

    #[test]
    fn no_migration_emitted_when_diff_is_empty() {
        let s = snapshot(&[("id", "TEXT")]);
        assert!(generate_migration(&s, &s, "00000000000001", "noop").is_none());
    }
}

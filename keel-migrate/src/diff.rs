//! Structural differencing of schema snapshots.
//!
//! Snapshots are first projected onto a plain JSON tree ([`snapshot_tree`]),
//! then compared by a generic recursive walk ([`diff_values`]) that knows
//! nothing about tables or columns. Interpreting the resulting paths is the
//! job of the changeset generators.
//!
//! Tree layout:
//!
//! ```text
//! schema/<namespace>                      true
//! extension/<name>                        true
//! enum/<name>                             ["label", ...]
//! table/<table>/column/<column>/<attr>    dataType, isNullable, default, identity
//! primaryKey/<table>                      ["column", ...]
//! index/<table>/<name>                    canonical definition
//! unique/<table>/<name>                   canonical definition
//! foreignKey/<table>/<name>               canonical definition
//! check/<table>/<name>                    normalized expression
//! trigger/<table>/<name>                  trigger definition
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use keel_schema::{
    ColumnInfo, ForeignKeyInfo, IdentityGeneration, IndexInfo, SchemaSnapshot,
    UniqueConstraintInfo,
};

/// What happened at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    /// Present only in the new tree.
    Create,
    /// Present only in the old tree.
    Remove,
    /// Present in both with different values.
    Change,
}

/// A single difference between two trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// Kind of difference.
    pub kind: DifferenceKind,
    /// Path to the differing node, e.g. `["table", "users", "column", "email"]`.
    pub path: Vec<String>,
    /// Value in the new (local) tree.
    pub new_value: Option<Value>,
    /// Value in the old (remote) tree.
    pub old_value: Option<Value>,
}

impl Difference {
    /// Path segment at `index`.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.path.get(index).map(String::as_str)
    }

    /// Whether the path starts with `prefix` and has exactly `len` segments.
    pub fn matches(&self, prefix: &[&str], len: usize) -> bool {
        self.path.len() == len
            && prefix
                .iter()
                .zip(&self.path)
                .all(|(expected, actual)| *expected == "*" || *expected == actual)
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            DifferenceKind::Create => '+',
            DifferenceKind::Remove => '-',
            DifferenceKind::Change => '~',
        };
        write!(f, "{sign} {}", self.path.join("."))
    }
}

/// Compare two snapshots: `remote` is the old tree, `local` the new one.
pub fn diff_snapshots(remote: &SchemaSnapshot, local: &SchemaSnapshot) -> Vec<Difference> {
    diff_values(&snapshot_tree(remote), &snapshot_tree(local))
}

/// Generic recursive diff.
///
/// Objects recurse key by key in lexicographic order; every other value
/// (arrays included) is compared whole. The output is sorted by path.
pub fn diff_values(old: &Value, new: &Value) -> Vec<Difference> {
    let mut out = Vec::new();
    walk(&mut Vec::new(), Some(old), Some(new), &mut out);
    out
}

fn walk(path: &mut Vec<String>, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<Difference>) {
    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => out.push(Difference {
            kind: DifferenceKind::Create,
            path: path.clone(),
            new_value: Some(new.clone()),
            old_value: None,
        }),
        (Some(old), None) => out.push(Difference {
            kind: DifferenceKind::Remove,
            path: path.clone(),
            new_value: None,
            old_value: Some(old.clone()),
        }),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(key.clone());
                walk(path, a.get(key), b.get(key), out);
                path.pop();
            }
        }
        (Some(old), Some(new)) => {
            if old != new {
                out.push(Difference {
                    kind: DifferenceKind::Change,
                    path: path.clone(),
                    new_value: Some(new.clone()),
                    old_value: Some(old.clone()),
                });
            }
        }
    }
}

/// Project a snapshot onto the comparison tree.
pub fn snapshot_tree(snapshot: &SchemaSnapshot) -> Value {
    let mut root = Map::new();

    root.insert(
        "schema".into(),
        Value::Object(snapshot.schemas.iter().map(|s| (s.clone(), json!(true))).collect()),
    );
    root.insert(
        "extension".into(),
        Value::Object(
            snapshot
                .extensions
                .iter()
                .map(|e| (e.clone(), json!(true)))
                .collect(),
        ),
    );
    root.insert(
        "enum".into(),
        Value::Object(
            snapshot
                .enums
                .iter()
                .map(|(name, e)| (name.clone(), json!(e.values)))
                .collect(),
        ),
    );

    let tables = snapshot
        .tables
        .iter()
        .map(|(name, table)| {
            let columns: Map<String, Value> = table
                .columns
                .iter()
                .map(|(c, info)| (c.clone(), column_tree(info)))
                .collect();
            (name.clone(), json!({ "column": columns }))
        })
        .collect();
    root.insert("table".into(), Value::Object(tables));

    root.insert(
        "primaryKey".into(),
        Value::Object(
            snapshot
                .primary_keys
                .iter()
                .map(|(t, pk)| (t.clone(), json!(pk.columns)))
                .collect(),
        ),
    );

    root.insert(
        "index".into(),
        nested(&snapshot.indexes, canonical_index),
    );
    root.insert(
        "unique".into(),
        nested(&snapshot.unique_constraints, canonical_unique),
    );
    root.insert(
        "foreignKey".into(),
        nested(&snapshot.foreign_keys, canonical_foreign_key),
    );
    root.insert(
        "check".into(),
        nested(&snapshot.check_constraints, |c| c.expression.clone()),
    );
    root.insert(
        "trigger".into(),
        nested(&snapshot.triggers, |t| t.definition.clone()),
    );

    Value::Object(root)
}

fn nested<T>(
    map: &std::collections::BTreeMap<String, std::collections::BTreeMap<String, T>>,
    canonical: impl Fn(&T) -> String,
) -> Value {
    Value::Object(
        map.iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(table, entries)| {
                let inner: Map<String, Value> = entries
                    .iter()
                    .map(|(name, entry)| (name.clone(), Value::String(canonical(entry))))
                    .collect();
                (table.clone(), Value::Object(inner))
            })
            .collect(),
    )
}

fn column_tree(column: &ColumnInfo) -> Value {
    let mut attrs = Map::new();
    attrs.insert("dataType".into(), json!(column.full_data_type()));
    attrs.insert("isNullable".into(), json!(column.is_nullable));
    if let Some(default) = &column.default {
        attrs.insert("default".into(), json!(default.hash));
    }
    if let Some(identity) = column.identity {
        let mode = match identity {
            IdentityGeneration::Always => "always",
            IdentityGeneration::ByDefault => "by_default",
        };
        attrs.insert("identity".into(), json!(mode));
    }
    Value::Object(attrs)
}

/// Canonical, name-independent text of an index.
pub fn canonical_index(index: &IndexInfo) -> String {
    let mut out = String::new();
    if index.unique {
        out.push_str("UNIQUE ");
    }
    out.push_str(&format!("USING {} ({})", index.method, index.columns.join(", ")));
    if let Some(predicate) = &index.predicate {
        out.push_str(&format!(" WHERE {predicate}"));
    }
    out
}

/// Canonical text of a unique constraint.
pub fn canonical_unique(unique: &UniqueConstraintInfo) -> String {
    let mut out = format!("UNIQUE ({})", unique.columns.join(", "));
    if !unique.nulls_distinct {
        out.push_str(" NULLS NOT DISTINCT");
    }
    out
}

/// Canonical text of a foreign key.
pub fn canonical_foreign_key(fk: &ForeignKeyInfo) -> String {
    let target = match &fk.referenced_schema {
        Some(schema) => format!("{schema}.{}", fk.referenced_table),
        None => fk.referenced_table.clone(),
    };
    format!(
        "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
        fk.columns.join(", "),
        target,
        fk.referenced_columns.join(", "),
        fk.on_delete.as_sql(),
        fk.on_update.as_sql()
    )
}

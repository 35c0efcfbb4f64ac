//! Rename detection.
//!
//! Runs before the differ. Tables that vanish from the remote snapshot while a
//! structurally similar table appears in the local one are treated as renames,
//! and the remote snapshot is rewritten under the new names so the differ sees
//! the renamed objects as unchanged. The same matching runs for columns of
//! tables present on both sides.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_schema::{
    CheckConstraintInfo, ColumnInfo, ForeignKeyInfo, IndexInfo, PrimaryKeyInfo, SchemaSnapshot,
    TableInfo, UniqueConstraintInfo,
};

use crate::config::DEFAULT_RENAME_THRESHOLD;
use crate::error::{MigrateResult, MigrationError};

/// Scores closer than this are considered equal.
const SCORE_EPSILON: f64 = 1e-9;

/// What was renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameKind {
    Table,
    Column,
}

/// Kind of a named object carried along by a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Index,
    /// Primary key, unique, foreign key or check constraint.
    Constraint,
}

/// An index or constraint whose name follows a renamed table or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRename {
    pub kind: ObjectKind,
    pub from: String,
    pub to: String,
}

/// An identity correspondence between an old and a new name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenameMapping {
    pub kind: RenameKind,
    /// Namespace.
    pub schema: String,
    /// Table holding the column, under its new name. For table renames this
    /// is the new table name.
    pub table: String,
    /// Old name.
    pub from: String,
    /// New name.
    pub to: String,
    /// Indexes and constraints of `table` renamed along with it, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectRename>,
}

impl RenameMapping {
    /// A table rename.
    pub fn table(schema: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        Self {
            kind: RenameKind::Table,
            schema: schema.into(),
            table: to.clone(),
            from: from.into(),
            to,
            objects: Vec::new(),
        }
    }

    /// A column rename inside `table`.
    pub fn column(
        schema: impl Into<String>,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            kind: RenameKind::Column,
            schema: schema.into(),
            table: table.into(),
            from: from.into(),
            to: to.into(),
            objects: Vec::new(),
        }
    }

    /// Attach the indexes and constraints renamed along with this mapping.
    pub fn with_objects(mut self, objects: Vec<ObjectRename>) -> Self {
        self.objects = objects;
        self
    }
}

/// An accepted rename with the score that justified it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenameCandidate {
    pub mapping: RenameMapping,
    /// Similarity in `0.0..=1.0`; `1.0` for caller overrides.
    pub score: f64,
}

/// Result of rename detection.
#[derive(Debug, Clone)]
pub struct RenameOutcome {
    /// Accepted renames, tables first.
    pub candidates: Vec<RenameCandidate>,
    /// The remote snapshot with renamed identifiers replaced by their new names.
    pub remote: SchemaSnapshot,
}

impl RenameOutcome {
    /// The accepted mappings.
    pub fn mappings(&self) -> Vec<RenameMapping> {
        self.candidates.iter().map(|c| c.mapping.clone()).collect()
    }
}

/// Detects table and column renames between two snapshots.
#[derive(Debug, Clone)]
pub struct RenameDetector {
    threshold: f64,
    overrides: Vec<RenameMapping>,
}

impl Default for RenameDetector {
    fn default() -> Self {
        Self::new(DEFAULT_RENAME_THRESHOLD)
    }
}

impl RenameDetector {
    /// Create a detector accepting renames scoring at least `threshold`.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            overrides: Vec::new(),
        }
    }

    /// Add caller-resolved renames. They bypass scoring.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = RenameMapping>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Detect renames and rewrite `remote` accordingly.
    pub fn detect(
        &self,
        remote: &SchemaSnapshot,
        local: &SchemaSnapshot,
    ) -> MigrateResult<RenameOutcome> {
        let namespace = local.namespace.clone();
        let mut rewritten = remote.clone();
        let mut candidates = Vec::new();

        let removed: BTreeSet<String> = remote
            .tables
            .keys()
            .filter(|t| !local.tables.contains_key(*t))
            .cloned()
            .collect();
        let added: BTreeSet<String> = local
            .tables
            .keys()
            .filter(|t| !remote.tables.contains_key(*t))
            .cloned()
            .collect();

        let table_overrides: Vec<&RenameMapping> = self
            .overrides
            .iter()
            .filter(|m| m.kind == RenameKind::Table && m.schema == namespace)
            .collect();
        let table_matches = self.match_names(
            &namespace,
            removed,
            added,
            &table_overrides,
            |from, to| table_similarity(&remote.tables[from], &local.tables[to]),
        )?;

        for (from, to, score) in table_matches {
            info!(namespace = %namespace, from = %from, to = %to, score, "Detected table rename");
            rename_table(&mut rewritten, &from, &to);
            let objects = align_object_names(&mut rewritten, local, &to);
            candidates.push(RenameCandidate {
                mapping: RenameMapping::table(&namespace, from, to).with_objects(objects),
                score,
            });
        }

        let common: Vec<String> = local
            .tables
            .keys()
            .filter(|t| rewritten.tables.contains_key(*t))
            .cloned()
            .collect();
        for table in common {
            let old = &rewritten.tables[&table];
            let new = &local.tables[&table];
            let removed: BTreeSet<String> = old
                .columns
                .keys()
                .filter(|c| !new.columns.contains_key(*c))
                .cloned()
                .collect();
            let added: BTreeSet<String> = new
                .columns
                .keys()
                .filter(|c| !old.columns.contains_key(*c))
                .cloned()
                .collect();
            if removed.is_empty() || added.is_empty() {
                continue;
            }

            let column_overrides: Vec<&RenameMapping> = self
                .overrides
                .iter()
                .filter(|m| {
                    m.kind == RenameKind::Column && m.schema == namespace && m.table == table
                })
                .collect();
            let matches = self.match_names(
                &format!("{namespace}.{table}"),
                removed,
                added,
                &column_overrides,
                |from, to| column_similarity(&old.columns[from], &new.columns[to]),
            )?;

            for (from, to, score) in matches {
                info!(table = %table, from = %from, to = %to, score, "Detected column rename");
                rename_column(&mut rewritten, &table, &from, &to);
                let objects = align_object_names(&mut rewritten, local, &table);
                candidates.push(RenameCandidate {
                    mapping: RenameMapping::column(&namespace, &table, from, to)
                        .with_objects(objects),
                    score,
                });
            }
        }

        Ok(RenameOutcome {
            candidates,
            remote: rewritten,
        })
    }

    /// Greedy best-first matching between removed and added names.
    fn match_names(
        &self,
        scope: &str,
        mut removed: BTreeSet<String>,
        mut added: BTreeSet<String>,
        overrides: &[&RenameMapping],
        score: impl Fn(&str, &str) -> f64,
    ) -> MigrateResult<Vec<(String, String, f64)>> {
        let mut matches = Vec::new();

        for mapping in overrides {
            if !removed.remove(&mapping.from) || !added.remove(&mapping.to) {
                return Err(MigrationError::configuration(format!(
                    "rename override `{}` -> `{}` in `{scope}` does not match a removed and an added name",
                    mapping.from, mapping.to
                )));
            }
            matches.push((mapping.from.clone(), mapping.to.clone(), 1.0));
        }

        loop {
            let mut scored: Vec<(f64, &String, &String)> = removed
                .iter()
                .flat_map(|r| added.iter().map(move |a| (r, a)))
                .map(|(r, a)| (score(r, a), r, a))
                .filter(|(s, _, _)| *s > 0.0 && *s + SCORE_EPSILON >= self.threshold)
                .collect();
            if scored.is_empty() {
                break;
            }
            scored.sort_by(|x, y| y.0.total_cmp(&x.0).then(x.1.cmp(y.1)).then(x.2.cmp(y.2)));

            let (best, from, to) = scored[0];
            let tied = |s: f64| (s - best).abs() < SCORE_EPSILON;
            let rivals_for_from: Vec<String> = scored
                .iter()
                .filter(|(s, r, _)| tied(*s) && *r == from)
                .map(|(_, _, a)| (*a).clone())
                .collect();
            if rivals_for_from.len() > 1 {
                return Err(MigrationError::RenameAmbiguity {
                    namespace: scope.to_string(),
                    from: from.clone(),
                    candidates: rivals_for_from,
                    score: best,
                });
            }
            let rivals_for_to: Vec<String> = scored
                .iter()
                .filter(|(s, _, a)| tied(*s) && *a == to)
                .map(|(_, r, _)| (*r).clone())
                .collect();
            if rivals_for_to.len() > 1 {
                return Err(MigrationError::RenameAmbiguity {
                    namespace: scope.to_string(),
                    from: to.clone(),
                    candidates: rivals_for_to,
                    score: best,
                });
            }

            let (from, to) = (from.clone(), to.clone());
            debug!(scope, from = %from, to = %to, score = best, "Accepted rename candidate");
            removed.remove(&from);
            added.remove(&to);
            matches.push((from, to, best));
        }

        Ok(matches)
    }
}

/// Fraction of columns with identical name and type.
pub fn table_similarity(old: &TableInfo, new: &TableInfo) -> f64 {
    let total = old.columns.len().max(new.columns.len());
    if total == 0 {
        return 0.0;
    }
    let same = old
        .columns
        .iter()
        .filter(|(name, column)| {
            new.columns
                .get(*name)
                .is_some_and(|other| other.full_data_type() == column.full_data_type())
        })
        .count();
    same as f64 / total as f64
}

/// Similarity of two columns: zero unless the types match, then the share of
/// matching attributes (type, nullability, default, identity) scaled by
/// [`name_similarity`].
pub fn column_similarity(old: &ColumnInfo, new: &ColumnInfo) -> f64 {
    if old.full_data_type() != new.full_data_type() {
        return 0.0;
    }
    let mut same = 1;
    if old.is_nullable == new.is_nullable {
        same += 1;
    }
    if old.default.as_ref().map(|d| &d.hash) == new.default.as_ref().map(|d| &d.hash) {
        same += 1;
    }
    if old.identity == new.identity {
        same += 1;
    }
    same as f64 / 4.0 * name_similarity(&old.name, &new.name)
}

/// Similarity of two identifiers in `0.0..=1.0`: the larger of the shared
/// `_`-separated tokens (Jaccard) and the shared character bigrams (Dice).
pub fn name_similarity(old: &str, new: &str) -> f64 {
    let old = old.to_lowercase();
    let new = new.to_lowercase();
    if old == new {
        return 1.0;
    }
    jaccard(&tokens(&old), &tokens(&new)).max(dice(&bigrams(&old), &bigrams(&new)))
}

fn tokens(name: &str) -> BTreeSet<&str> {
    name.split('_').filter(|t| !t.is_empty()).collect()
}

fn bigrams(name: &str) -> BTreeSet<(char, char)> {
    let chars: Vec<char> = name.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn dice<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    2.0 * a.intersection(b).count() as f64 / total as f64
}

fn move_key<V>(map: &mut BTreeMap<String, V>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}

fn rename_table(snapshot: &mut SchemaSnapshot, from: &str, to: &str) {
    if let Some(mut table) = snapshot.tables.remove(from) {
        table.name = to.to_string();
        snapshot.tables.insert(to.to_string(), table);
    }
    move_key(&mut snapshot.indexes, from, to);
    move_key(&mut snapshot.primary_keys, from, to);
    move_key(&mut snapshot.unique_constraints, from, to);
    move_key(&mut snapshot.foreign_keys, from, to);
    move_key(&mut snapshot.check_constraints, from, to);
    move_key(&mut snapshot.triggers, from, to);

    let namespace = snapshot.namespace.clone();
    for fks in snapshot.foreign_keys.values_mut() {
        for fk in fks.values_mut() {
            if fk.referenced_table == from && fk.references_namespace(&namespace) {
                fk.referenced_table = to.to_string();
            }
        }
    }

    if let Some(triggers) = snapshot.triggers.get_mut(to) {
        let old_target = format!(" ON {namespace}.{from} ");
        let new_target = format!(" ON {namespace}.{to} ");
        for trigger in triggers.values_mut() {
            trigger.definition = trigger.definition.replace(&old_target, &new_target);
        }
    }
}

fn rename_column(snapshot: &mut SchemaSnapshot, table: &str, from: &str, to: &str) {
    if let Some(info) = snapshot.tables.get_mut(table) {
        let columns: IndexMap<String, ColumnInfo> = std::mem::take(&mut info.columns)
            .into_iter()
            .map(|(name, mut column)| {
                if name == from {
                    column.name = to.to_string();
                    (to.to_string(), column)
                } else {
                    (name, column)
                }
            })
            .collect();
        info.columns = columns;
    }

    let swap = |columns: &mut Vec<String>| {
        for column in columns.iter_mut() {
            if column == from {
                *column = to.to_string();
            }
        }
    };

    if let Some(indexes) = snapshot.indexes.get_mut(table) {
        indexes.values_mut().for_each(|i| swap(&mut i.columns));
    }
    if let Some(pk) = snapshot.primary_keys.get_mut(table) {
        swap(&mut pk.columns);
    }
    if let Some(uniques) = snapshot.unique_constraints.get_mut(table) {
        uniques.values_mut().for_each(|u| swap(&mut u.columns));
    }
    if let Some(fks) = snapshot.foreign_keys.get_mut(table) {
        fks.values_mut().for_each(|fk| swap(&mut fk.columns));
    }

    let namespace = snapshot.namespace.clone();
    for fks in snapshot.foreign_keys.values_mut() {
        for fk in fks.values_mut() {
            if fk.referenced_table == table && fk.references_namespace(&namespace) {
                swap(&mut fk.referenced_columns);
            }
        }
    }
}

/// An index or constraint keyed by its name.
trait NamedObject: Clone + PartialEq {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: &str);

    /// Equal to `other` apart from the name.
    fn same_definition(&self, other: &Self) -> bool {
        let mut renamed = self.clone();
        renamed.set_name(other.name());
        renamed == *other
    }
}

macro_rules! named_object {
    ($($ty:ty),*) => {
        $(impl NamedObject for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: &str) {
                self.name = name.to_string();
            }
        })*
    };
}

named_object!(IndexInfo, PrimaryKeyInfo, UniqueConstraintInfo, ForeignKeyInfo, CheckConstraintInfo);

/// Rename the indexes and constraints of `table` in `remote` whose local
/// counterpart has the same definition under another, unused name.
fn align_object_names(
    remote: &mut SchemaSnapshot,
    local: &SchemaSnapshot,
    table: &str,
) -> Vec<ObjectRename> {
    let mut taken = object_names(remote);
    let mut renamed = Vec::new();

    let keys = (remote.primary_keys.get_mut(table), local.primary_keys.get(table));
    if let (Some(old), Some(new)) = keys {
        if old.name != new.name && old.same_definition(new) && !taken.contains(&new.name) {
            renamed.push(ObjectRename {
                kind: ObjectKind::Constraint,
                from: old.name.clone(),
                to: new.name.clone(),
            });
            taken.insert(new.name.clone());
            old.name = new.name.clone();
        }
    }
    align_map(
        &mut remote.unique_constraints,
        &local.unique_constraints,
        table,
        ObjectKind::Constraint,
        &mut taken,
        &mut renamed,
    );
    align_map(
        &mut remote.foreign_keys,
        &local.foreign_keys,
        table,
        ObjectKind::Constraint,
        &mut taken,
        &mut renamed,
    );
    align_map(
        &mut remote.check_constraints,
        &local.check_constraints,
        table,
        ObjectKind::Constraint,
        &mut taken,
        &mut renamed,
    );
    align_map(
        &mut remote.indexes,
        &local.indexes,
        table,
        ObjectKind::Index,
        &mut taken,
        &mut renamed,
    );

    for object in &renamed {
        debug!(table, from = %object.from, to = %object.to, "Renamed dependent object");
    }
    renamed
}

fn align_map<T: NamedObject>(
    remote: &mut BTreeMap<String, BTreeMap<String, T>>,
    local: &BTreeMap<String, BTreeMap<String, T>>,
    table: &str,
    kind: ObjectKind,
    taken: &mut BTreeSet<String>,
    renamed: &mut Vec<ObjectRename>,
) {
    let (Some(old), Some(new)) = (remote.get_mut(table), local.get(table)) else {
        return;
    };
    let vanished: Vec<String> = old.keys().filter(|n| !new.contains_key(*n)).cloned().collect();
    for from in vanished {
        let matches: Vec<&String> = new
            .iter()
            .filter(|(name, object)| {
                !old.contains_key(*name)
                    && !taken.contains(*name)
                    && old[&from].same_definition(object)
            })
            .map(|(name, _)| name)
            .collect();
        let [to] = matches.as_slice() else {
            continue;
        };
        let to = (*to).clone();
        if let Some(mut object) = old.remove(&from) {
            object.set_name(&to);
            old.insert(to.clone(), object);
            taken.insert(to.clone());
            renamed.push(ObjectRename { kind, from, to });
        }
    }
}

/// Index and constraint names in use anywhere in the namespace.
fn object_names(snapshot: &SchemaSnapshot) -> BTreeSet<String> {
    let mut names: BTreeSet<String> =
        snapshot.primary_keys.values().map(|pk| pk.name.clone()).collect();
    for map in snapshot.indexes.values() {
        names.extend(map.keys().cloned());
    }
    for map in snapshot.unique_constraints.values() {
        names.extend(map.keys().cloned());
    }
    for map in snapshot.foreign_keys.values() {
        names.extend(map.keys().cloned());
    }
    for map in snapshot.check_constraints.values() {
        names.extend(map.keys().cloned());
    }
    names
}

/// Table order across a rename: remote dependency order with each rename
/// target placed right after its source, followed by local-only tables.
pub fn dependency_order(
    remote: &SchemaSnapshot,
    local: &SchemaSnapshot,
    renames: &[RenameMapping],
) -> Vec<String> {
    let targets: BTreeMap<&str, &str> = renames
        .iter()
        .filter(|m| m.kind == RenameKind::Table)
        .map(|m| (m.from.as_str(), m.to.as_str()))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut seen = BTreeSet::new();
    for table in remote.table_priorities() {
        let target = targets.get(table.as_str()).map(|t| t.to_string());
        if seen.insert(table.clone()) {
            order.push(table);
        }
        if let Some(target) = target {
            if seen.insert(target.clone()) {
                order.push(target);
            }
        }
    }
    for table in local.table_priorities() {
        if seen.insert(table.clone()) {
            order.push(table);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::ReferentialAction;
    use pretty_assertions::assert_eq;

    fn table(name: &str, columns: &[(&str, &str)]) -> TableInfo {
        let mut t = TableInfo::new(name);
        for (c, ty) in columns {
            t.add_column(ColumnInfo::parse(*c, ty));
        }
        t
    }

    fn snapshot(tables: Vec<TableInfo>) -> SchemaSnapshot {
        let mut s = SchemaSnapshot::existing("public");
        for t in tables {
            s.add_table(t);
        }
        s
    }

    #[test]
    fn test_identical_tables_are_renamed() {
        let posters = [("id", "integer"), ("url", "text"), ("width", "integer")];
        let books = [("id", "integer"), ("isbn", "varchar(13)"), ("title", "text")];
        let remote = snapshot(vec![table("posters", &posters), table("books", &books)]);
        let local = snapshot(vec![table("new_posters", &posters), table("new_books", &books)]);

        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert_eq!(
            outcome.mappings(),
            vec![
                RenameMapping::table("public", "books", "new_books"),
                RenameMapping::table("public", "posters", "new_posters"),
            ]
        );
        assert!(outcome.remote.tables.contains_key("new_posters"));
        assert!(!outcome.remote.tables.contains_key("posters"));
    }

    #[test]
    fn test_unrelated_tables_are_not_renamed() {
        let remote = snapshot(vec![table("posters", &[("url", "text")])]);
        let local = snapshot(vec![table("invoices", &[("amount", "numeric(10,2)")])]);
        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn test_ambiguous_rename_is_surfaced() {
        let cols = [("id", "integer"), ("name", "text")];
        let remote = snapshot(vec![table("tags", &cols)]);
        let local = snapshot(vec![table("labels", &cols), table("topics", &cols)]);
        let err = RenameDetector::default().detect(&remote, &local).unwrap_err();
        match err {
            MigrationError::RenameAmbiguity { from, candidates, .. } => {
                assert_eq!(from, "tags");
                assert_eq!(candidates, vec!["labels", "topics"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_resolves_ambiguity() {
        let cols = [("id", "integer"), ("name", "text")];
        let remote = snapshot(vec![table("tags", &cols)]);
        let local = snapshot(vec![table("labels", &cols), table("topics", &cols)]);
        let outcome = RenameDetector::default()
            .with_overrides([RenameMapping::table("public", "tags", "labels")])
            .detect(&remote, &local)
            .unwrap();
        assert_eq!(outcome.mappings(), vec![RenameMapping::table("public", "tags", "labels")]);
        assert!(outcome.remote.tables.contains_key("labels"));
    }

    #[test]
    fn test_column_rename() {
        let remote = snapshot(vec![table("users", &[("id", "integer"), ("mail", "text")])]);
        let local = snapshot(vec![table("users", &[("id", "integer"), ("email", "text")])]);
        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert_eq!(
            outcome.mappings(),
            vec![RenameMapping::column("public", "users", "mail", "email")]
        );
        let columns: Vec<&String> = outcome.remote.tables["users"].columns.keys().collect();
        assert_eq!(columns, vec!["id", "email"]);
    }

    #[test]
    fn test_unrelated_columns_of_same_type_are_not_renamed() {
        let remote = snapshot(vec![table("users", &[("id", "integer"), ("legacy_notes", "text")])]);
        let local = snapshot(vec![table("users", &[("id", "integer"), ("avatar_url", "text")])]);
        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert!(outcome.candidates.is_empty());

        let remote = snapshot(vec![table(
            "users",
            &[("id", "integer"), ("bio", "text"), ("nickname", "text")],
        )]);
        let local = snapshot(vec![table("users", &[("id", "integer"), ("nick_name", "text")])]);
        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert_eq!(
            outcome.mappings(),
            vec![RenameMapping::column("public", "users", "nickname", "nick_name")]
        );
    }

    #[test]
    fn test_name_similarity() {
        assert_eq!(name_similarity("email", "EMAIL"), 1.0);
        assert_eq!(name_similarity("legacy_notes", "avatar_url"), 0.0);
        assert!(name_similarity("mail", "email") > 0.8);
        assert!(name_similarity("name", "full_name") >= 0.5);
    }

    #[test]
    fn test_column_type_change_is_not_a_rename() {
        let remote = snapshot(vec![table("users", &[("age", "text")])]);
        let local = snapshot(vec![table("users", &[("years", "integer")])]);
        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn test_rewrite_follows_references() {
        let mut remote = snapshot(vec![
            table("users", &[("id", "integer")]),
            table("posts", &[("id", "integer"), ("user_id", "integer")]),
        ]);
        remote.foreign_keys.entry("posts".into()).or_default().insert(
            "posts_user_id_fkey".into(),
            ForeignKeyInfo {
                name: "posts_user_id_fkey".into(),
                columns: vec!["user_id".into()],
                referenced_schema: None,
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            },
        );
        remote.indexes.entry("users".into()).or_default().insert(
            "users_id_idx".into(),
            IndexInfo::new("users_id_idx", vec!["id".into()]),
        );

        let mut local = remote.clone();
        rename_table(&mut local, "users", "accounts");

        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert_eq!(outcome.remote, local);
        assert_eq!(
            outcome.remote.foreign_keys["posts"]["posts_user_id_fkey"].referenced_table,
            "accounts"
        );
    }

    #[test]
    fn test_table_rename_carries_object_names() {
        let mut remote = snapshot(vec![table("posters", &[("id", "integer"), ("title", "text")])]);
        remote.primary_keys.insert(
            "posters".into(),
            PrimaryKeyInfo {
                name: "posters_pkey".into(),
                columns: vec!["id".into()],
            },
        );
        remote.unique_constraints.entry("posters".into()).or_default().insert(
            "posters_title_key".into(),
            UniqueConstraintInfo {
                name: "posters_title_key".into(),
                columns: vec!["title".into()],
                nulls_distinct: true,
            },
        );
        remote.indexes.entry("posters".into()).or_default().insert(
            "posters_title_idx".into(),
            IndexInfo::new("posters_title_idx", vec!["title".into()]),
        );
        remote.indexes.entry("posters".into()).or_default().insert(
            "posters_search".into(),
            IndexInfo::new("posters_search", vec!["id".into(), "title".into()]),
        );

        let mut local = remote.clone();
        rename_table(&mut local, "posters", "new_posters");
        local.primary_keys.get_mut("new_posters").unwrap().name = "new_posters_pkey".into();
        let uniques = local.unique_constraints.get_mut("new_posters").unwrap();
        let mut unique = uniques.remove("posters_title_key").unwrap();
        unique.name = "new_posters_title_key".into();
        uniques.insert(unique.name.clone(), unique);
        let indexes = local.indexes.get_mut("new_posters").unwrap();
        indexes.remove("posters_title_idx");
        indexes.insert(
            "new_posters_title_idx".into(),
            IndexInfo::new("new_posters_title_idx", vec!["title".into()]),
        );

        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        let objects = |kind, from: &str, to: &str| ObjectRename {
            kind,
            from: from.into(),
            to: to.into(),
        };
        assert_eq!(
            outcome.mappings(),
            vec![RenameMapping::table("public", "posters", "new_posters").with_objects(vec![
                objects(ObjectKind::Constraint, "posters_pkey", "new_posters_pkey"),
                objects(ObjectKind::Constraint, "posters_title_key", "new_posters_title_key"),
                objects(ObjectKind::Index, "posters_title_idx", "new_posters_title_idx"),
            ])]
        );
        assert_eq!(outcome.remote, local);
    }

    #[test]
    fn test_column_rename_carries_object_names() {
        let mut remote = snapshot(vec![table("users", &[("id", "integer"), ("mail", "text")])]);
        remote.indexes.entry("users".into()).or_default().insert(
            "users_mail_idx".into(),
            IndexInfo::new("users_mail_idx", vec!["mail".into()]),
        );
        let mut local = snapshot(vec![table("users", &[("id", "integer"), ("email", "text")])]);
        local.indexes.entry("users".into()).or_default().insert(
            "users_email_idx".into(),
            IndexInfo::new("users_email_idx", vec!["email".into()]),
        );

        let outcome = RenameDetector::default().detect(&remote, &local).unwrap();
        assert_eq!(
            outcome.mappings()[0].objects,
            vec![ObjectRename {
                kind: ObjectKind::Index,
                from: "users_mail_idx".into(),
                to: "users_email_idx".into(),
            }]
        );
        assert_eq!(outcome.remote, local);
    }

    #[test]
    fn test_dependency_order_with_renames() {
        let names = ["users", "videos", "posters", "books", "buildings"];
        let mut remote = snapshot(names.iter().map(|n| table(n, &[("id", "integer")])).collect());
        for (child, parent) in [("videos", "users"), ("posters", "videos"), ("books", "posters"), ("buildings", "books")] {
            remote.foreign_keys.entry(child.into()).or_default().insert(
                format!("{child}_{parent}_fkey"),
                ForeignKeyInfo {
                    name: format!("{child}_{parent}_fkey"),
                    columns: vec![format!("{parent}_id")],
                    referenced_schema: None,
                    referenced_table: parent.into(),
                    referenced_columns: vec!["id".into()],
                    on_delete: ReferentialAction::NoAction,
                    on_update: ReferentialAction::NoAction,
                },
            );
        }
        let local = remote.clone();
        let renames = vec![
            RenameMapping::table("public", "users", "new_users"),
            RenameMapping::table("public", "posters", "new_posters"),
            RenameMapping::table("public", "books", "new_books"),
        ];

        assert_eq!(
            dependency_order(&remote, &local, &renames),
            vec![
                "users",
                "new_users",
                "videos",
                "posters",
                "new_posters",
                "books",
                "new_books",
                "buildings"
            ]
        );
    }
}

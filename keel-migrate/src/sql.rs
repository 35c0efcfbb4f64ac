//! SQL generation for PostgreSQL.

use keel_schema::ColumnInfo;

use crate::ddl::Statement;

/// Renders [`Statement`]s as PostgreSQL SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSqlGenerator;

impl PostgresSqlGenerator {
    /// Render a list of statements, one per line.
    pub fn render_all(&self, statements: &[Statement]) -> String {
        statements
            .iter()
            .map(|s| self.render(s))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render a single statement, terminated by `;`.
    pub fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::CreateSchema { schema } => {
                format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema))
            }
            Statement::DropSchema { schema } => format!("DROP SCHEMA {};", quote_ident(schema)),
            Statement::CreateExtension { schema, name } => format!(
                "CREATE EXTENSION IF NOT EXISTS {} SCHEMA {};",
                quote_ident(name),
                quote_ident(schema)
            ),
            Statement::DropExtension { name } => {
                format!("DROP EXTENSION IF EXISTS {};", quote_ident(name))
            }
            Statement::CreateEnum {
                schema,
                name,
                values,
            } => {
                let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
                format!(
                    "CREATE TYPE {} AS ENUM ({});",
                    qualified(schema, name),
                    values.join(", ")
                )
            }
            Statement::DropEnum { schema, name } => {
                format!("DROP TYPE {};", qualified(schema, name))
            }
            Statement::AddEnumValue {
                schema,
                name,
                value,
                before,
            } => {
                let mut sql = format!(
                    "ALTER TYPE {} ADD VALUE {}",
                    qualified(schema, name),
                    quote_literal(value)
                );
                if let Some(before) = before {
                    sql.push_str(&format!(" BEFORE {}", quote_literal(before)));
                }
                sql.push(';');
                sql
            }
            Statement::CreateTable {
                schema,
                table,
                columns,
            } => {
                let columns: Vec<String> = columns
                    .iter()
                    .map(|c| self.column_definition(schema, c))
                    .collect();
                if columns.is_empty() {
                    format!("CREATE TABLE {} ();", qualified(schema, table))
                } else {
                    format!(
                        "CREATE TABLE {} (\n    {}\n);",
                        qualified(schema, table),
                        columns.join(",\n    ")
                    )
                }
            }
            Statement::DropTable { schema, table } => {
                format!("DROP TABLE {};", qualified(schema, table))
            }
            Statement::RenameTable { schema, from, to } => format!(
                "ALTER TABLE {} RENAME TO {};",
                qualified(schema, from),
                quote_ident(to)
            ),
            Statement::AddColumn {
                schema,
                table,
                column,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {};",
                qualified(schema, table),
                self.column_definition(schema, column)
            ),
            Statement::DropColumn {
                schema,
                table,
                column,
            } => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                qualified(schema, table),
                quote_ident(column)
            ),
            Statement::RenameColumn {
                schema,
                table,
                from,
                to,
            } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {};",
                qualified(schema, table),
                quote_ident(from),
                quote_ident(to)
            ),
            Statement::AlterColumnType {
                schema,
                table,
                column,
                data_type,
                user_defined,
            } => {
                let ty = render_type(schema, data_type, *user_defined);
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    qualified(schema, table),
                    quote_ident(column),
                    ty,
                    quote_ident(column),
                    ty
                )
            }
            Statement::SetColumnDefault {
                schema,
                table,
                column,
                expression,
            } => alter_column(schema, table, column, &format!("SET DEFAULT {expression}")),
            Statement::DropColumnDefault {
                schema,
                table,
                column,
            } => alter_column(schema, table, column, "DROP DEFAULT"),
            Statement::SetNotNull {
                schema,
                table,
                column,
            } => alter_column(schema, table, column, "SET NOT NULL"),
            Statement::DropNotNull {
                schema,
                table,
                column,
            } => alter_column(schema, table, column, "DROP NOT NULL"),
            Statement::AddIdentity {
                schema,
                table,
                column,
                generation,
            } => alter_column(
                schema,
                table,
                column,
                &format!("ADD GENERATED {} AS IDENTITY", generation.as_sql()),
            ),
            Statement::DropIdentity {
                schema,
                table,
                column,
            } => alter_column(schema, table, column, "DROP IDENTITY"),
            Statement::SetIdentityGeneration {
                schema,
                table,
                column,
                generation,
            } => alter_column(
                schema,
                table,
                column,
                &format!("SET GENERATED {}", generation.as_sql()),
            ),
            Statement::CreateIndex {
                schema,
                table,
                index,
                concurrently,
            } => {
                let mut sql = String::from("CREATE ");
                if index.unique {
                    sql.push_str("UNIQUE ");
                }
                sql.push_str("INDEX ");
                if *concurrently {
                    sql.push_str("CONCURRENTLY ");
                }
                let elements: Vec<String> = index.columns.iter().map(|c| index_element(c)).collect();
                sql.push_str(&format!(
                    "{} ON {} USING {} ({})",
                    quote_ident(&index.name),
                    qualified(schema, table),
                    index.method,
                    elements.join(", ")
                ));
                if let Some(predicate) = &index.predicate {
                    sql.push_str(&format!(" WHERE {predicate}"));
                }
                sql.push(';');
                sql
            }
            Statement::DropIndex {
                schema,
                name,
                concurrently,
            } => format!(
                "DROP INDEX {}{};",
                if *concurrently { "CONCURRENTLY " } else { "" },
                qualified(schema, name)
            ),
            Statement::AddPrimaryKey { schema, table, key } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
                qualified(schema, table),
                quote_ident(&key.name),
                ident_list(&key.columns)
            ),
            Statement::AddUniqueConstraint {
                schema,
                table,
                constraint,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE{} ({});",
                qualified(schema, table),
                quote_ident(&constraint.name),
                if constraint.nulls_distinct {
                    ""
                } else {
                    " NULLS NOT DISTINCT"
                },
                ident_list(&constraint.columns)
            ),
            Statement::AddForeignKey {
                schema,
                table,
                constraint,
            } => {
                let target_schema = constraint.referenced_schema.as_deref().unwrap_or(schema);
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {};",
                    qualified(schema, table),
                    quote_ident(&constraint.name),
                    ident_list(&constraint.columns),
                    qualified(target_schema, &constraint.referenced_table),
                    ident_list(&constraint.referenced_columns),
                    constraint.on_delete.as_sql(),
                    constraint.on_update.as_sql()
                )
            }
            Statement::AddCheckConstraint {
                schema,
                table,
                name,
                expression,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({});",
                qualified(schema, table),
                quote_ident(name),
                expression
            ),
            Statement::DropConstraint {
                schema,
                table,
                name,
            } => format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                qualified(schema, table),
                quote_ident(name)
            ),
            Statement::RenameIndex { schema, from, to, .. } => format!(
                "ALTER INDEX {} RENAME TO {};",
                qualified(schema, from),
                quote_ident(to)
            ),
            Statement::RenameConstraint {
                schema,
                table,
                from,
                to,
            } => format!(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {};",
                qualified(schema, table),
                quote_ident(from),
                quote_ident(to)
            ),
            Statement::CreateTrigger { definition, .. } => {
                format!("{};", definition.trim_end_matches(';'))
            }
            Statement::DropTrigger {
                schema,
                table,
                name,
            } => format!(
                "DROP TRIGGER {} ON {};",
                quote_ident(name),
                qualified(schema, table)
            ),
            Statement::Raw { sql, .. } => {
                let sql = sql.trim();
                if sql.ends_with(';') {
                    sql.to_string()
                } else {
                    format!("{sql};")
                }
            }
        }
    }

    /// Column definition as used by `CREATE TABLE` and `ADD COLUMN`.
    pub fn column_definition(&self, schema: &str, column: &ColumnInfo) -> String {
        let mut parts = vec![
            quote_ident(&column.name),
            render_type(schema, &column.full_data_type(), column.user_defined),
        ];
        if let Some(identity) = column.identity {
            parts.push(format!("GENERATED {} AS IDENTITY", identity.as_sql()));
        }
        if !column.is_nullable && !column.is_serial() && column.identity.is_none() {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default.expression));
        }
        parts.join(" ")
    }
}

fn alter_column(schema: &str, table: &str, column: &str, action: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} {};",
        qualified(schema, table),
        quote_ident(column),
        action
    )
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"schema"."name"`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

fn ident_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn index_element(element: &str) -> String {
    if element.contains('(') || element.contains(' ') {
        element.to_string()
    } else {
        quote_ident(element)
    }
}

/// Built-in types are written as-is; user-defined types are qualified.
fn render_type(schema: &str, data_type: &str, user_defined: bool) -> String {
    if !user_defined {
        return data_type.to_string();
    }
    let element = data_type.trim_end_matches("[]");
    let arrays = &data_type[element.len()..];
    format!("{}{}", qualified(schema, element), arrays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{ForeignKeyInfo, IdentityGeneration, IndexInfo, ReferentialAction};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_table() {
        let generator = PostgresSqlGenerator;
        let sql = generator.render(&Statement::CreateTable {
            schema: "public".into(),
            table: "users".into(),
            columns: vec![
                ColumnInfo::parse("id", "bigint").identity(IdentityGeneration::Always),
                ColumnInfo::parse("email", "varchar(255)").not_null(),
                ColumnInfo::parse("active", "boolean").default_expr("true"),
            ],
        });
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"users\" (\n    \
             \"id\" bigint GENERATED ALWAYS AS IDENTITY,\n    \
             \"email\" character varying(255) NOT NULL,\n    \
             \"active\" boolean DEFAULT true\n);"
        );
    }

    #[test]
    fn test_rename_index_and_constraint() {
        let generator = PostgresSqlGenerator;
        assert_eq!(
            generator.render(&Statement::RenameIndex {
                schema: "app".into(),
                table: "accounts".into(),
                from: "users_email_idx".into(),
                to: "accounts_email_idx".into(),
            }),
            "ALTER INDEX \"app\".\"users_email_idx\" RENAME TO \"accounts_email_idx\";"
        );
        assert_eq!(
            generator.render(&Statement::RenameConstraint {
                schema: "app".into(),
                table: "accounts".into(),
                from: "users_pkey".into(),
                to: "accounts_pkey".into(),
            }),
            "ALTER TABLE \"app\".\"accounts\" RENAME CONSTRAINT \"users_pkey\" TO \"accounts_pkey\";"
        );
    }

    #[test]
    fn test_enum_column_is_qualified() {
        let generator = PostgresSqlGenerator;
        let mut column = ColumnInfo::parse("mood", "mood");
        column.user_defined = true;
        assert_eq!(
            generator.column_definition("app", &column),
            "\"mood\" \"app\".\"mood\""
        );
    }

    #[test]
    fn test_concurrent_index() {
        let generator = PostgresSqlGenerator;
        let mut index = IndexInfo::new("users_email_idx", vec!["email".into(), "lower(name)".into()]);
        index.predicate = Some("deleted_at is null".into());
        let sql = generator.render(&Statement::CreateIndex {
            schema: "public".into(),
            table: "users".into(),
            index,
            concurrently: true,
        });
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY \"users_email_idx\" ON \"public\".\"users\" USING btree (\"email\", lower(name)) WHERE deleted_at is null;"
        );
    }

    #[test]
    fn test_foreign_key() {
        let generator = PostgresSqlGenerator;
        let sql = generator.render(&Statement::AddForeignKey {
            schema: "public".into(),
            table: "posts".into(),
            constraint: ForeignKeyInfo {
                name: "posts_author_id_fkey".into(),
                columns: vec!["author_id".into()],
                referenced_schema: None,
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            },
        });
        assert!(sql.contains("FOREIGN KEY (\"author_id\") REFERENCES \"public\".\"users\" (\"id\")"));
        assert!(sql.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_literal_escaping() {
        let generator = PostgresSqlGenerator;
        let sql = generator.render(&Statement::AddEnumValue {
            schema: "public".into(),
            name: "mood".into(),
            value: "it's fine".into(),
            before: None,
        });
        assert_eq!(sql, "ALTER TYPE \"public\".\"mood\" ADD VALUE 'it''s fine';");
    }

    #[test]
    fn test_raw_gets_terminator() {
        let generator = PostgresSqlGenerator;
        let sql = generator.render(&Statement::Raw {
            sql: "UPDATE users SET active = true".into(),
            transactional: true,
        });
        assert_eq!(sql, "UPDATE users SET active = true;");
    }
}

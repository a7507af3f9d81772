//! Static table descriptions used to generate schema migrations.

use rusqlite::Connection;

/// A single column of a model table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    /// SQLite type affinity, e.g. `INTEGER`, `TEXT`.
    pub sql_type: &'static str,
    pub primary_key: bool,
    pub nullable: bool,
    /// Raw SQL default expression.
    pub default: Option<&'static str>,
}

impl ColumnDef {
    /// A `NOT NULL` column without a default.
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            primary_key: false,
            nullable: false,
            default: None,
        }
    }

    /// An auto-incrementing integer primary key.
    pub const fn primary_key(name: &'static str) -> Self {
        Self {
            name,
            sql_type: "INTEGER",
            primary_key: true,
            nullable: false,
            default: None,
        }
    }

    pub const fn null(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub const fn with_default(self, expr: &'static str) -> Self {
        Self {
            default: Some(expr),
            ..self
        }
    }

    /// Renders the column as it appears in `CREATE TABLE` / `ADD COLUMN`.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// The table a model persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
}

impl TableSchema {
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| format!("    {}", c.to_sql())).collect();
        format!(
            "CREATE TABLE \"{}\" (\n{}\n);",
            self.table,
            columns.join(",\n")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE \"{}\";", self.table)
    }
}

/// Statements that bring a live database in line with a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}

/// Compares `tables` against the schema currently in `conn`.
///
/// Missing tables produce `CREATE TABLE`; missing columns on existing
/// tables produce `ADD COLUMN`. Columns or tables present in the database
/// but absent from `tables` are left alone. `down` undoes `up` in reverse
/// order.
///
/// # Errors
///
/// Returns the underlying SQLite error if the schema cannot be inspected.
pub fn diff_schema(conn: &Connection, tables: &[TableSchema]) -> rusqlite::Result<SchemaDiff> {
    let mut diff = SchemaDiff::default();

    for table in tables {
        let existing = table_columns(conn, table.table)?;
        if existing.is_empty() {
            diff.up.push(table.create_sql());
            diff.down.push(table.drop_sql());
            continue;
        }
        for column in table.columns {
            if existing.iter().any(|name| name == column.name) {
                continue;
            }
            diff.up.push(format!(
                "ALTER TABLE \"{}\" ADD COLUMN {};",
                table.table,
                column.to_sql()
            ));
            diff.down.push(format!(
                "ALTER TABLE \"{}\" DROP COLUMN \"{}\";",
                table.table, column.name
            ));
        }
    }

    diff.down.reverse();
    Ok(diff)
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_COLUMNS: &[ColumnDef] = &[
        ColumnDef::primary_key("id"),
        ColumnDef::new("name", "TEXT"),
        ColumnDef::new("title", "TEXT").null(),
        ColumnDef::new("active", "INTEGER").with_default("1"),
    ];

    const USER: TableSchema = TableSchema {
        table: "user",
        columns: USER_COLUMNS,
    };

    #[test]
    fn renders_create_table() {
        assert_eq!(
            USER.create_sql(),
            "CREATE TABLE \"user\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \"name\" TEXT NOT NULL,\n    \"title\" TEXT,\n    \"active\" INTEGER NOT NULL DEFAULT 1\n);"
        );
    }

    #[test]
    fn diff_creates_missing_tables() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let diff = diff_schema(&conn, &[USER]).expect("diff should succeed");
        assert_eq!(diff.up, vec![USER.create_sql()]);
        assert_eq!(diff.down, vec!["DROP TABLE \"user\";".to_string()]);

        conn.execute_batch(&diff.up.join("\n"))
            .expect("generated SQL should execute");
        let again = diff_schema(&conn, &[USER]).expect("diff should succeed");
        assert!(again.is_empty(), "no changes once the table exists");
    }

    #[test]
    fn diff_adds_missing_columns() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("CREATE TABLE \"user\" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .expect("should create partial table");

        let diff = diff_schema(&conn, &[USER]).expect("diff should succeed");
        assert_eq!(diff.up.len(), 2);
        assert!(diff.up[0].contains("ADD COLUMN \"title\" TEXT"));
        assert!(diff.up[1].contains("ADD COLUMN \"active\" INTEGER NOT NULL DEFAULT 1"));
        assert_eq!(
            diff.down,
            vec![
                "ALTER TABLE \"user\" DROP COLUMN \"active\";".to_string(),
                "ALTER TABLE \"user\" DROP COLUMN \"title\";".to_string(),
            ]
        );

        conn.execute_batch(&diff.up.join("\n"))
            .expect("generated SQL should execute");
        conn.execute_batch(&diff.down.join("\n"))
            .expect("generated rollback should execute");
    }
}

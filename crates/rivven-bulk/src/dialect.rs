//! SQL dialect differences the loader cares about
//!
//! Only the statement text each strategy needs is generated here:
//! - identifier quoting and qualified table names
//! - positional parameter placeholders
//! - the row-wise `INSERT`
//! - native column types for structured-type definitions

use crate::types::ColumnType;

/// SQL dialect for vendor-specific statement text
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a 1-based parameter index (e.g., $1, @P1)
    fn placeholder(&self, index: usize) -> String;

    /// Native type for a semantic column type
    fn native_type(&self, column_type: ColumnType) -> &'static str;

    /// Quote a possibly schema-qualified name
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_identifier(s), self.quote_identifier(name)),
            None => self.quote_identifier(name),
        }
    }

    /// Build a single-row parameterized INSERT
    fn insert_sql(&self, schema: Option<&str>, table: &str, columns: &[&str]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(schema, table),
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

/// PostgreSQL / ANSI dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn native_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Int16 => "SMALLINT",
            ColumnType::Int32 => "INTEGER",
            ColumnType::Int64 => "BIGINT",
            ColumnType::Float32 => "REAL",
            ColumnType::Float64 => "DOUBLE PRECISION",
            ColumnType::Decimal => "NUMERIC",
            ColumnType::Text => "TEXT",
            ColumnType::Bytes => "BYTEA",
            ColumnType::Uuid => "UUID",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::DateTime => "TIMESTAMP",
            ColumnType::DateTimeTz => "TIMESTAMPTZ",
            ColumnType::Json => "JSONB",
        }
    }
}

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn native_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Bool => "BIT",
            ColumnType::Int16 => "SMALLINT",
            ColumnType::Int32 => "INT",
            ColumnType::Int64 => "BIGINT",
            ColumnType::Float32 => "REAL",
            ColumnType::Float64 => "FLOAT",
            ColumnType::Decimal => "DECIMAL(38,10)",
            ColumnType::Text => "NVARCHAR(MAX)",
            ColumnType::Bytes => "VARBINARY(MAX)",
            ColumnType::Uuid => "UNIQUEIDENTIFIER",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::DateTime => "DATETIME2",
            ColumnType::DateTimeTz => "DATETIMEOFFSET",
            ColumnType::Json => "NVARCHAR(MAX)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(dialect.placeholder(1), "$1");
    }

    #[test]
    fn test_sqlserver_dialect() {
        let dialect = SqlServerDialect;
        assert_eq!(dialect.quote_identifier("users"), "[users]");
        assert_eq!(dialect.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(dialect.placeholder(2), "@P2");
        assert_eq!(dialect.native_type(ColumnType::Uuid), "UNIQUEIDENTIFIER");
    }

    #[test]
    fn test_insert_sql() {
        let sql = SqlServerDialect.insert_sql(None, "DapperBulkInsert", &["id", "Description"]);
        assert_eq!(
            sql,
            "INSERT INTO [DapperBulkInsert] ([id], [Description]) VALUES (@P1, @P2)"
        );

        let sql = PostgresDialect.insert_sql(Some("public"), "events", &["id"]);
        assert_eq!(sql, "INSERT INTO \"public\".\"events\" (\"id\") VALUES ($1)");
    }
}

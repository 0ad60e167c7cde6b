//! Schema catalog for structured (table-valued) parameter types
//!
//! The catalog maps a registered structured type name to its column
//! definitions. It is consulted only by the set-valued strategy, which needs
//! the definitions to shape the parameter and checks that the job schema
//! matches them before anything is sent.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::security::{validate_qualified_name, validate_sql_identifier, validate_sql_type_name};
use crate::types::{ColumnType, Schema};

/// Column of a structured type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredColumn {
    /// Column name
    pub name: String,
    /// Semantic type
    pub column_type: ColumnType,
    /// Native type specification, e.g. `NVARCHAR(50)`
    pub sql_type: String,
}

impl StructuredColumn {
    /// Create a structured column
    pub fn new(
        name: impl Into<String>,
        column_type: ColumnType,
        sql_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            sql_type: sql_type.into(),
        }
    }
}

/// A server-side structured type, e.g. `CREATE TYPE SampleTableType AS TABLE (...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredType {
    /// Owning schema
    pub schema: Option<String>,
    /// Type name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<StructuredColumn>,
}

impl StructuredType {
    /// Create an empty structured type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Set owning schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a column
    pub fn with_column(mut self, column: StructuredColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Derive a structured type from a load schema using a dialect's native types
    pub fn from_schema(name: impl Into<String>, schema: &Schema, dialect: &dyn SqlDialect) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: schema
                .columns()
                .iter()
                .map(|c| {
                    StructuredColumn::new(
                        c.name.clone(),
                        c.column_type,
                        dialect.native_type(c.column_type),
                    )
                })
                .collect(),
        }
    }

    /// Fully qualified name
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    /// Check that every name and type spec is safe to write into SQL
    pub fn validate(&self) -> Result<()> {
        if let Some(schema) = &self.schema {
            validate_sql_identifier(schema)?;
        }
        validate_sql_identifier(&self.name)?;
        for column in &self.columns {
            validate_sql_identifier(&column.name)?;
            validate_sql_type_name(&column.sql_type)?;
        }
        Ok(())
    }

    /// Check that a job schema lines up with this type: same column count,
    /// names equal ignoring case, in order, and equal semantic types
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        if self.columns.len() != schema.len() {
            return Err(Error::schema_mismatch(format!(
                "structured type {} has {} columns, job schema has {}",
                self.qualified_name(),
                self.columns.len(),
                schema.len()
            )));
        }

        for (idx, (expected, actual)) in self.columns.iter().zip(schema.columns()).enumerate() {
            if !expected.name.eq_ignore_ascii_case(&actual.name) {
                return Err(Error::schema_mismatch(format!(
                    "structured type {} column {} is '{}', job schema has '{}'",
                    self.qualified_name(),
                    idx,
                    expected.name,
                    actual.name
                )));
            }
            if expected.column_type != actual.column_type {
                return Err(Error::schema_mismatch(format!(
                    "structured type {} column '{}' is {}, job schema has {}",
                    self.qualified_name(),
                    expected.name,
                    expected.column_type,
                    actual.column_type
                )));
            }
        }

        Ok(())
    }
}

/// Lookup of structured types by name
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Resolve a structured type; `name` may be schema-qualified
    async fn structured_type(&self, name: &str) -> Result<Option<StructuredType>>;
}

/// Catalog backed by an in-process registry
#[derive(Debug, Default)]
pub struct StaticCatalog {
    types: RwLock<HashMap<String, StructuredType>>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a structured type
    pub fn register(&self, structured_type: StructuredType) -> Result<()> {
        structured_type.validate()?;
        let key = catalog_key(&structured_type.qualified_name());
        self.types.write().insert(key, structured_type);
        Ok(())
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

#[async_trait]
impl SchemaCatalog for StaticCatalog {
    async fn structured_type(&self, name: &str) -> Result<Option<StructuredType>> {
        validate_qualified_name(name)?;
        let types = self.types.read();
        if let Some(found) = types.get(&catalog_key(name)) {
            return Ok(Some(found.clone()));
        }
        // Unqualified lookups also match a type registered under a schema
        if !name.contains('.') {
            return Ok(types
                .values()
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .cloned());
        }
        Ok(None)
    }
}

fn catalog_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

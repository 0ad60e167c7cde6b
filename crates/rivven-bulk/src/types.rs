//! Value, row and schema types for rivven-bulk
//!
//! - `Value`: a tagged SQL value
//! - `Row`: an ordered tuple of values, immutable once built
//! - `ColumnType` / `Column` / `Schema`: the fixed shape every row of a job
//!   must match

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::security::validate_sql_identifier;

/// SQL value type that can hold any loadable database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, NVARCHAR, TEXT)
    String(String),
    /// Binary data (VARBINARY, BYTEA)
    Bytes(Vec<u8>),
    /// UUID (UNIQUEIDENTIFIER)
    Uuid(Uuid),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME2)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (DATETIMEOFFSET)
    DateTimeTz(DateTime<Utc>),
    /// JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Semantic column type of this value, `None` for NULL
    pub fn column_type(&self) -> Option<ColumnType> {
        let ty = match self {
            Self::Null => return None,
            Self::Bool(_) => ColumnType::Bool,
            Self::Int16(_) => ColumnType::Int16,
            Self::Int32(_) => ColumnType::Int32,
            Self::Int64(_) => ColumnType::Int64,
            Self::Float32(_) => ColumnType::Float32,
            Self::Float64(_) => ColumnType::Float64,
            Self::Decimal(_) => ColumnType::Decimal,
            Self::String(_) => ColumnType::Text,
            Self::Bytes(_) => ColumnType::Bytes,
            Self::Uuid(_) => ColumnType::Uuid,
            Self::Date(_) => ColumnType::Date,
            Self::Time(_) => ColumnType::Time,
            Self::DateTime(_) => ColumnType::DateTime,
            Self::DateTimeTz(_) => ColumnType::DateTimeTz,
            Self::Json(_) => ColumnType::Json,
        };
        Some(ty)
    }

    /// Name used in mismatch messages
    pub fn type_name(&self) -> &'static str {
        self.column_type().map(ColumnType::name).unwrap_or("null")
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Semantic type of a schema column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ColumnType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Json,
}

impl ColumnType {
    /// Stable lowercase name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::DateTimeTz => "datetimetz",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column of a load schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name in the target table
    pub name: String,
    /// Semantic type
    pub column_type: ColumnType,
    /// Whether NULL is accepted
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Create a nullable column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Check whether a value fits this column
    #[inline]
    pub fn accepts(&self, value: &Value) -> bool {
        match value.column_type() {
            None => self.nullable,
            Some(ty) => ty == self.column_type,
        }
    }
}

/// Ordered column layout shared by every row in a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Create a schema from columns
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Columns in order
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Get column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check the schema itself: non-empty, valid and unique column names
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::schema_mismatch("schema must have at least one column"));
        }

        let mut seen = HashSet::with_capacity(self.columns.len());
        for column in &self.columns {
            validate_sql_identifier(&column.name)
                .map_err(|e| Error::schema_mismatch(format!("column '{}': {}", column.name, e)))?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::schema_mismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }

        Ok(())
    }

    /// Check a row against this schema (field count, types, nullability)
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::schema_mismatch(format!(
                "expected {} fields, got {}",
                self.columns.len(),
                row.len()
            )));
        }

        for (idx, (column, value)) in self.columns.iter().zip(row.values()).enumerate() {
            if !column.accepts(value) {
                return Err(Error::schema_mismatch(format!(
                    "field {} ('{}') expects {}{}, got {}",
                    idx,
                    column.name,
                    column.column_type,
                    if column.nullable { "" } else { " not null" },
                    value.type_name()
                )));
            }
        }

        Ok(())
    }

    /// Check that rows of `source` can be copied column for column into a
    /// table with this layout: same column count, names equal ignoring case,
    /// same types. JSON values may land in a text column.
    pub fn check_copy_source(&self, table: &str, source: &Schema) -> Result<()> {
        if self.columns.len() != source.len() {
            return Err(Error::schema_mismatch(format!(
                "table {} has {} columns, rows have {}",
                table,
                self.columns.len(),
                source.len()
            )));
        }

        for (idx, (expected, actual)) in self.columns.iter().zip(source.columns()).enumerate() {
            if !expected.name.eq_ignore_ascii_case(&actual.name) {
                return Err(Error::schema_mismatch(format!(
                    "table {} column {} is '{}', rows have '{}'",
                    table, idx, expected.name, actual.name
                )));
            }
            let compatible = expected.column_type == actual.column_type
                || (expected.column_type == ColumnType::Text
                    && actual.column_type == ColumnType::Json);
            if !compatible {
                return Err(Error::schema_mismatch(format!(
                    "table {} column '{}' is {}, rows have {}",
                    table, expected.name, expected.column_type, actual.column_type
                )));
            }
        }

        Ok(())
    }
}

impl FromIterator<Column> for Schema {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Ordered tuple of field values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get field count
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by field index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Uuid).not_null(),
            Column::new("description", ColumnType::Text),
        ])
    }

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int32(0).is_null());
        assert_eq!(Value::Null.column_type(), None);
    }

    #[test]
    fn test_value_from_impl() {
        let v: Value = 42_i32.into();
        assert!(matches!(v, Value::Int32(42)));

        let v: Value = "hello".into();
        assert!(matches!(v, Value::String(s) if s == "hello"));

        let v: Value = None::<i32>.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_schema_check_row_accepts_conforming_row() {
        let schema = sample_schema();
        let row = Row::new(vec![Value::Uuid(Uuid::new_v4()), "Test Desc 0".into()]);
        assert!(schema.check_row(&row).is_ok());

        let row = Row::new(vec![Value::Uuid(Uuid::new_v4()), Value::Null]);
        assert!(schema.check_row(&row).is_ok());
    }

    #[test]
    fn test_schema_check_row_rejects_wrong_count() {
        let schema = sample_schema();
        let row = Row::new(vec![Value::Uuid(Uuid::new_v4())]);
        let err = schema.check_row(&row).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(err.to_string().contains("expected 2 fields, got 1"));
    }

    #[test]
    fn test_schema_check_row_rejects_wrong_type_and_null() {
        let schema = sample_schema();

        let row = Row::new(vec![Value::Int32(1), "x".into()]);
        let err = schema.check_row(&row).unwrap_err();
        assert!(err.to_string().contains("'id'"));

        let row = Row::new(vec![Value::Null, "x".into()]);
        let err = schema.check_row(&row).unwrap_err();
        assert!(err.to_string().contains("not null"));
    }

    #[test]
    fn test_check_copy_source() {
        let table = Schema::new(vec![
            Column::new("id", ColumnType::Uuid),
            Column::new("description", ColumnType::Text),
        ]);
        assert!(table.check_copy_source("items", &sample_schema()).is_ok());

        let json = Schema::new(vec![
            Column::new("ID", ColumnType::Uuid),
            Column::new("Description", ColumnType::Json),
        ]);
        assert!(table.check_copy_source("items", &json).is_ok());

        let narrow = Schema::new(vec![Column::new("id", ColumnType::Uuid)]);
        let err = table.check_copy_source("items", &narrow).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(err.to_string().contains("2 columns"));

        let swapped = Schema::new(vec![
            Column::new("description", ColumnType::Text),
            Column::new("id", ColumnType::Uuid),
        ]);
        assert!(table.check_copy_source("items", &swapped).is_err());

        let retyped = Schema::new(vec![
            Column::new("id", ColumnType::Text),
            Column::new("description", ColumnType::Text),
        ]);
        assert!(table.check_copy_source("items", &retyped).is_err());
    }

    #[test]
    fn test_schema_validate() {
        assert!(sample_schema().validate().is_ok());
        assert!(Schema::new(vec![]).validate().is_err());

        let dup = Schema::new(vec![
            Column::new("id", ColumnType::Int32),
            Column::new("ID", ColumnType::Int64),
        ]);
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));

        let bad = Schema::new(vec![Column::new("id; DROP", ColumnType::Int32)]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_schema_column_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.column_names(), vec!["id", "description"]);
        assert_eq!(
            schema.column("DESCRIPTION").map(|c| c.column_type),
            Some(ColumnType::Text)
        );
    }
}

//! SQL injection guards for names interpolated into statement text.
//!
//! Row values are always bound as parameters. Table, column, procedure and
//! structured-type names cannot be, so every name that reaches SQL text goes
//! through one of these checks first.

use crate::error::Error;

/// Maximum accepted identifier length
const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate a single SQL identifier (table, column, procedure, parameter).
///
/// - Must not be empty
/// - At most 128 characters (SQL Server `sysname`)
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use rivven_bulk::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("DapperBulkInsert").is_ok());
/// assert!(validate_sql_identifier("usp_SampleTableInsert").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Validate a possibly schema-qualified name such as `dbo.usp_SampleTableInsert`.
///
/// At most two parts; each part must pass [`validate_sql_identifier`].
///
/// ```
/// use rivven_bulk::security::validate_qualified_name;
///
/// assert!(validate_qualified_name("dbo.SampleTableType").is_ok());
/// assert!(validate_qualified_name("SampleTableType").is_ok());
/// assert!(validate_qualified_name("a.b.c").is_err());
/// ```
pub fn validate_qualified_name(name: &str) -> crate::Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(Error::config(format!(
            "Invalid qualified name '{}': at most schema.name is allowed",
            name
        )));
    }
    parts.into_iter().try_for_each(validate_sql_identifier)
}

/// Validate a SQL type specification before it is written into a statement.
///
/// Only letters, digits, underscores, spaces, parentheses and commas are
/// accepted: `INT`, `NVARCHAR(50)`, `NVARCHAR(MAX)`, `DECIMAL(18,4)`.
///
/// ```
/// use rivven_bulk::security::validate_sql_type_name;
///
/// assert!(validate_sql_type_name("UNIQUEIDENTIFIER").is_ok());
/// assert!(validate_sql_type_name("NVARCHAR(50)").is_ok());
/// assert!(validate_sql_type_name("INT; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_type_name(type_name: &str) -> crate::Result<()> {
    if type_name.is_empty() {
        return Err(Error::config("SQL type name cannot be empty"));
    }

    if type_name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL type name too long: {} chars (max {})",
            type_name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    for c in type_name.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ')) {
            return Err(Error::config(format!(
                "Invalid SQL type name '{}': contains invalid character '{}'",
                type_name, c
            )));
        }
    }

    Ok(())
}

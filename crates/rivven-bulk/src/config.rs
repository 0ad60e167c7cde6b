//! Load configuration
//!
//! ```yaml
//! table: DapperBulkInsert
//! schema: dbo
//! small_batch_threshold: 100
//! set_param_max_rows: 1000
//! max_buffer_rows: 1000000
//! set_valued:
//!   procedure: dbo.usp_SampleTableInsert
//!   type_name: dbo.SampleTableType
//!   parameter: TVP
//! timeout_ms: 60000
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::connection::IsolationLevel;
use crate::error::{Error, Result};
use crate::security::{validate_qualified_name, validate_sql_identifier};
use crate::strategy::{Strategy, Thresholds};

/// Procedure and structured type used by the set-valued strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SetValuedConfig {
    /// Procedure receiving the row set
    #[validate(custom(function = "validate_qualified"))]
    pub procedure: String,

    /// Registered structured type of the parameter
    #[validate(custom(function = "validate_qualified"))]
    pub type_name: String,

    /// Parameter name, without `@`
    #[serde(default = "default_parameter")]
    #[validate(custom(function = "validate_identifier"))]
    pub parameter: String,
}

impl SetValuedConfig {
    /// Create a set-valued target with the default parameter name
    pub fn new(procedure: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            type_name: type_name.into(),
            parameter: default_parameter(),
        }
    }

    /// Override the parameter name
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }
}

/// Configuration of a load job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LoadConfig {
    /// Target table
    #[validate(custom(function = "validate_identifier"))]
    pub table: String,

    /// Target schema
    #[serde(default)]
    #[validate(custom(function = "validate_identifier"))]
    pub schema: Option<String>,

    /// At or below this row count, row-wise inserts are used (default: 100)
    #[serde(default = "default_small_batch_threshold")]
    pub small_batch_threshold: usize,

    /// Largest row set a single structured parameter may carry (default: 1000)
    #[serde(default = "default_set_param_max_rows")]
    #[validate(range(min = 1))]
    pub set_param_max_rows: usize,

    /// Buffer limit per job (default: 1,000,000)
    #[serde(default = "default_max_buffer_rows")]
    #[validate(range(min = 1))]
    pub max_buffer_rows: usize,

    /// Bypass selection and use this strategy
    #[serde(default)]
    pub force_strategy: Option<Strategy>,

    /// Procedure/type pair enabling the set-valued strategy
    #[serde(default)]
    #[validate(nested)]
    pub set_valued: Option<SetValuedConfig>,

    /// Abort the transfer after this many milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Isolation level of the load transaction
    #[serde(default)]
    pub isolation_level: Option<IsolationLevel>,
}

fn default_small_batch_threshold() -> usize {
    100
}

fn default_set_param_max_rows() -> usize {
    1000
}

fn default_max_buffer_rows() -> usize {
    1_000_000
}

fn default_parameter() -> String {
    "rows".to_string()
}

fn validate_identifier(value: &str) -> std::result::Result<(), ValidationError> {
    validate_sql_identifier(value).map_err(|e| {
        let mut err = ValidationError::new("identifier");
        err.message = Some(e.to_string().into());
        err
    })
}

fn validate_qualified(value: &str) -> std::result::Result<(), ValidationError> {
    validate_qualified_name(value).map_err(|e| {
        let mut err = ValidationError::new("qualified_name");
        err.message = Some(e.to_string().into());
        err
    })
}

impl LoadConfig {
    /// Create configuration for a target table with default thresholds
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            small_batch_threshold: default_small_batch_threshold(),
            set_param_max_rows: default_set_param_max_rows(),
            max_buffer_rows: default_max_buffer_rows(),
            force_strategy: None,
            set_valued: None,
            timeout_ms: None,
            isolation_level: None,
        }
    }

    /// Set target schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the row-wise threshold
    pub fn with_small_batch_threshold(mut self, rows: usize) -> Self {
        self.small_batch_threshold = rows;
        self
    }

    /// Set the set-valued parameter row limit
    pub fn with_set_param_max_rows(mut self, rows: usize) -> Self {
        self.set_param_max_rows = rows;
        self
    }

    /// Set the per-job buffer limit
    pub fn with_max_buffer_rows(mut self, rows: usize) -> Self {
        self.max_buffer_rows = rows;
        self
    }

    /// Force a strategy
    pub fn with_force_strategy(mut self, strategy: Strategy) -> Self {
        self.force_strategy = Some(strategy);
        self
    }

    /// Enable the set-valued strategy
    pub fn with_set_valued(mut self, set_valued: SetValuedConfig) -> Self {
        self.set_valued = Some(set_valued);
        self
    }

    /// Set transfer timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set transaction isolation level
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Transfer timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Selection thresholds
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            small_batch_threshold: self.small_batch_threshold,
            set_param_max_rows: self.set_param_max_rows,
        }
    }

    /// Run all validation rules, reporting failures as configuration errors
    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid load config: {}", e)))
    }
}

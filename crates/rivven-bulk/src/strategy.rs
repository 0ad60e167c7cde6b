//! Loading strategy selection
//!
//! `select` is a pure function of row count, target capabilities and
//! thresholds. Decision order:
//!
//! 1. Small jobs (`row_count <= small_batch_threshold`) use row-wise inserts
//! 2. Targets with a bulk channel use streamed bulk copy
//! 3. Targets with set-valued parameters use them up to `set_param_max_rows`
//! 4. Otherwise bulk copy if available, else `NoViableStrategy`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// One of the mutually exclusive loading algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One parameterized INSERT per row
    RowWiseInsert,
    /// Rows streamed through the driver's native bulk channel
    StreamedBulkCopy,
    /// Whole row set passed as one structured parameter to a procedure
    SetValuedInsert,
}

impl Strategy {
    /// Stable name used in config and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RowWiseInsert => "row_wise_insert",
            Self::StreamedBulkCopy => "streamed_bulk_copy",
            Self::SetValuedInsert => "set_valued_insert",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags reported by a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Native bulk-ingestion channel available
    pub bulk_copy: bool,
    /// Structured (table-valued) parameters available
    pub set_valued_params: bool,
}

impl Capabilities {
    /// Target supporting every strategy
    pub const fn all() -> Self {
        Self {
            bulk_copy: true,
            set_valued_params: true,
        }
    }

    /// Target supporting only row-wise inserts
    pub const fn row_wise_only() -> Self {
        Self {
            bulk_copy: false,
            set_valued_params: false,
        }
    }

    /// Whether a strategy can run against this target at all
    pub const fn supports(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::RowWiseInsert => true,
            Strategy::StreamedBulkCopy => self.bulk_copy,
            Strategy::SetValuedInsert => self.set_valued_params,
        }
    }
}

/// Row-count thresholds driving selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// At or below this count, row-wise inserts win
    pub small_batch_threshold: usize,
    /// Driver-imposed ceiling for a single set-valued parameter
    pub set_param_max_rows: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            small_batch_threshold: 100,
            set_param_max_rows: 1000,
        }
    }
}

/// Choose a strategy for a job
pub fn select(
    row_count: usize,
    capabilities: Capabilities,
    thresholds: Thresholds,
) -> Result<Strategy> {
    if row_count <= thresholds.small_batch_threshold {
        return Ok(Strategy::RowWiseInsert);
    }
    if capabilities.bulk_copy {
        return Ok(Strategy::StreamedBulkCopy);
    }
    if capabilities.set_valued_params && row_count <= thresholds.set_param_max_rows {
        return Ok(Strategy::SetValuedInsert);
    }
    if capabilities.bulk_copy {
        return Ok(Strategy::StreamedBulkCopy);
    }
    Err(Error::no_viable_strategy(format!(
        "{} rows exceed the row-wise threshold of {} and the target offers no bulk copy{}",
        row_count,
        thresholds.small_batch_threshold,
        if capabilities.set_valued_params {
            format!(
                " (set-valued parameters are limited to {} rows)",
                thresholds.set_param_max_rows
            )
        } else {
            String::new()
        }
    )))
}

/// Check that an explicitly requested strategy can run
pub fn check_forced(
    strategy: Strategy,
    row_count: usize,
    capabilities: Capabilities,
    thresholds: Thresholds,
) -> Result<Strategy> {
    if !capabilities.supports(strategy) {
        return Err(Error::no_viable_strategy(format!(
            "forced strategy {} is not supported by the target",
            strategy
        )));
    }
    if strategy == Strategy::SetValuedInsert && row_count > thresholds.set_param_max_rows {
        return Err(Error::no_viable_strategy(format!(
            "forced strategy {} cannot carry {} rows (limit {})",
            strategy, row_count, thresholds.set_param_max_rows
        )));
    }
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(small: usize, set_max: usize) -> Thresholds {
        Thresholds {
            small_batch_threshold: small,
            set_param_max_rows: set_max,
        }
    }

    #[test]
    fn test_small_jobs_use_row_wise() {
        for caps in [Capabilities::all(), Capabilities::row_wise_only()] {
            assert_eq!(
                select(5, caps, thresholds(10, 1000)).unwrap(),
                Strategy::RowWiseInsert
            );
            assert_eq!(
                select(10, caps, thresholds(10, 1000)).unwrap(),
                Strategy::RowWiseInsert
            );
            assert_eq!(
                select(0, caps, thresholds(10, 1000)).unwrap(),
                Strategy::RowWiseInsert
            );
        }
    }

    #[test]
    fn test_bulk_copy_preferred_over_set_valued() {
        assert_eq!(
            select(500, Capabilities::all(), thresholds(100, 1000)).unwrap(),
            Strategy::StreamedBulkCopy
        );
        assert_eq!(
            select(5000, Capabilities::all(), thresholds(100, 1000)).unwrap(),
            Strategy::StreamedBulkCopy
        );
    }

    #[test]
    fn test_set_valued_within_limit() {
        let caps = Capabilities {
            bulk_copy: false,
            set_valued_params: true,
        };
        assert_eq!(
            select(1000, caps, thresholds(100, 1000)).unwrap(),
            Strategy::SetValuedInsert
        );

        let err = select(1001, caps, thresholds(100, 1000)).unwrap_err();
        assert!(matches!(err, Error::NoViableStrategy { .. }));
        assert!(err.to_string().contains("limited to 1000"));
    }

    #[test]
    fn test_no_viable_strategy() {
        let err = select(101, Capabilities::row_wise_only(), thresholds(100, 1000)).unwrap_err();
        assert!(matches!(err, Error::NoViableStrategy { .. }));
    }

    #[test]
    fn test_select_is_deterministic() {
        let caps = Capabilities {
            bulk_copy: false,
            set_valued_params: true,
        };
        for n in [0usize, 1, 99, 100, 101, 999, 1000, 1001, 50_000] {
            let first = select(n, caps, Thresholds::default()).ok();
            for _ in 0..3 {
                assert_eq!(select(n, caps, Thresholds::default()).ok(), first);
            }
        }
    }

    #[test]
    fn test_check_forced() {
        let t = thresholds(10, 100);
        assert!(check_forced(Strategy::RowWiseInsert, 5000, Capabilities::row_wise_only(), t).is_ok());
        assert!(check_forced(Strategy::StreamedBulkCopy, 5, Capabilities::row_wise_only(), t).is_err());
        assert!(check_forced(Strategy::SetValuedInsert, 100, Capabilities::all(), t).is_ok());
        assert!(check_forced(Strategy::SetValuedInsert, 101, Capabilities::all(), t).is_err());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::StreamedBulkCopy.to_string(), "streamed_bulk_copy");
        let parsed: Strategy = serde_json::from_str("\"set_valued_insert\"").unwrap();
        assert_eq!(parsed, Strategy::SetValuedInsert);
    }
}

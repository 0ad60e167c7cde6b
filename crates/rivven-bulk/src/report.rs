//! Load job results

use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Error;
use crate::strategy::Strategy;

/// How a load job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOutcome {
    /// All rows committed
    Committed,
    /// Transfer failed and was rolled back
    Failed,
    /// Transfer was cancelled and rolled back
    Cancelled,
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable summary of one load job
#[derive(Debug)]
pub struct LoadReport {
    job_id: Uuid,
    attempted: u64,
    committed: u64,
    elapsed: Duration,
    strategy: Option<Strategy>,
    outcome: LoadOutcome,
    failure: Option<Error>,
    rollback_failure: Option<Error>,
}

impl LoadReport {
    pub(crate) fn new_committed(
        job_id: Uuid,
        attempted: u64,
        committed: u64,
        strategy: Strategy,
        elapsed: Duration,
    ) -> Self {
        Self {
            job_id,
            attempted,
            committed,
            elapsed,
            strategy: Some(strategy),
            outcome: LoadOutcome::Committed,
            failure: None,
            rollback_failure: None,
        }
    }

    /// Build a report for a job that did not commit.
    ///
    /// A `Cancelled` cause yields the `Cancelled` outcome, anything else `Failed`.
    pub(crate) fn aborted(
        job_id: Uuid,
        attempted: u64,
        strategy: Option<Strategy>,
        elapsed: Duration,
        cause: Error,
    ) -> Self {
        let outcome = match cause {
            Error::Cancelled => LoadOutcome::Cancelled,
            _ => LoadOutcome::Failed,
        };
        Self {
            job_id,
            attempted,
            committed: 0,
            elapsed,
            strategy,
            outcome,
            failure: Some(cause),
            rollback_failure: None,
        }
    }

    /// Attach the error of a rollback that could not be delivered
    pub(crate) fn with_rollback_failure(mut self, error: Option<Error>) -> Self {
        self.rollback_failure = error;
        self
    }

    /// Identifier of the job
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Rows in the job
    pub fn attempted(&self) -> u64 {
        self.attempted
    }

    /// Rows made durable
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Wall-clock time from finalize to outcome
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Strategy used; `None` if none could be chosen
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Outcome
    pub fn outcome(&self) -> LoadOutcome {
        self.outcome
    }

    /// Failure cause
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Error of a rollback that could not be delivered. Nothing was committed,
    /// but the connection should not be reused.
    pub fn rollback_failure(&self) -> Option<&Error> {
        self.rollback_failure.as_ref()
    }

    /// Whether the job committed
    pub fn is_committed(&self) -> bool {
        self.outcome == LoadOutcome::Committed
    }

    /// Take the failure cause out of the report
    pub fn into_result(self) -> crate::Result<u64> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.committed),
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} {}: {}/{} rows",
            self.job_id, self.outcome, self.committed, self.attempted
        )?;
        if let Some(strategy) = self.strategy {
            write!(f, " via {}", strategy)?;
        }
        write!(f, " in {:?}", self.elapsed)?;
        if let Some(cause) = &self.failure {
            write!(f, " ({})", cause)?;
        }
        if let Some(rollback) = &self.rollback_failure {
            write!(f, " [rollback failed: {}]", rollback)?;
        }
        Ok(())
    }
}

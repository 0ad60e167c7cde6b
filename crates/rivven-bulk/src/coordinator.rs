//! Load coordinator
//!
//! Public entry point: open a job for a schema, add rows, run it.
//!
//! ```rust,no_run
//! use rivven_bulk::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(conn: &dyn Connection) -> rivven_bulk::Result<()> {
//! let coordinator = LoadCoordinator::new(
//!     LoadConfig::new("DapperBulkInsert").with_small_batch_threshold(10),
//! );
//! let mut job = coordinator.open(Schema::new(vec![
//!     Column::new("id", ColumnType::Uuid),
//!     Column::new("Description", ColumnType::Text),
//! ]))?;
//!
//! for i in 0..5 {
//!     coordinator.add(
//!         &mut job,
//!         Row::new(vec![
//!             Value::Uuid(uuid::Uuid::new_v4()),
//!             Value::from(format!("Sample {}", i)),
//!         ]),
//!     )?;
//! }
//!
//! let report = coordinator.run(job, conn, &CancellationToken::new()).await;
//! assert_eq!(report.strategy(), Some(Strategy::RowWiseInsert));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::buffer::RowBuffer;
use crate::catalog::SchemaCatalog;
use crate::config::LoadConfig;
use crate::connection::Connection;
use crate::engine::{effective_capabilities, TransferEngine};
use crate::error::Result;
use crate::report::LoadReport;
use crate::stats::{AtomicLoadStats, LoadStats};
use crate::strategy::{self, Strategy};
use crate::types::{Row, Schema};

/// One logical load: a schema and the rows buffered for it
#[derive(Debug)]
pub struct LoadJob {
    id: Uuid,
    buffer: RowBuffer,
}

impl LoadJob {
    /// Job identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Schema every row must match
    pub fn schema(&self) -> &Schema {
        self.buffer.schema()
    }

    /// Rows buffered so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no rows are buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Orchestrates load jobs: buffering, strategy selection and transfer
pub struct LoadCoordinator {
    config: LoadConfig,
    catalog: Option<Arc<dyn SchemaCatalog>>,
    stats: AtomicLoadStats,
}

impl LoadCoordinator {
    /// Create a coordinator; the config is validated when a job runs
    pub fn new(config: LoadConfig) -> Self {
        Self {
            config,
            catalog: None,
            stats: AtomicLoadStats::default(),
        }
    }

    /// Resolve structured types through this catalog instead of the connection's
    pub fn with_catalog(mut self, catalog: Arc<dyn SchemaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Configuration used by `run`
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Open an empty job for a schema
    pub fn open(&self, schema: Schema) -> Result<LoadJob> {
        schema.validate()?;
        Ok(LoadJob {
            id: Uuid::new_v4(),
            buffer: RowBuffer::new(schema, self.config.max_buffer_rows),
        })
    }

    /// Append a row to a job; buffer errors surface immediately
    pub fn add(&self, job: &mut LoadJob, row: Row) -> Result<()> {
        job.buffer.append(row)
    }

    /// Run a job with the coordinator's configuration
    pub async fn run(
        &self,
        job: LoadJob,
        connection: &dyn Connection,
        cancel: &CancellationToken,
    ) -> LoadReport {
        self.run_with_config(job, connection, &self.config, cancel)
            .await
    }

    /// Run a job with an explicit configuration.
    ///
    /// The job is consumed and released whatever the outcome.
    pub async fn run_with_config(
        &self,
        mut job: LoadJob,
        connection: &dyn Connection,
        config: &LoadConfig,
        cancel: &CancellationToken,
    ) -> LoadReport {
        let span = info_span!("bulk_load", job_id = %job.id, table = %config.table);
        let report = async {
            let started = Instant::now();
            let job_id = job.id;
            let rows = job.buffer.finalize();
            let attempted = rows.len() as u64;

            let strategy = match choose_strategy(rows.len(), connection, config) {
                Ok(strategy) => strategy,
                Err(e) => {
                    warn!(rows = attempted, error = %e, "No strategy for load");
                    return LoadReport::aborted(job_id, attempted, None, started.elapsed(), e);
                }
            };
            info!(
                strategy = %strategy,
                rows = attempted,
                forced = config.force_strategy.is_some(),
                "Strategy selected"
            );

            let mut engine = TransferEngine::new(config);
            if let Some(catalog) = &self.catalog {
                engine = engine.with_catalog(catalog.as_ref());
            }
            engine
                .transfer(job_id, rows, strategy, connection, cancel)
                .await
        }
        .instrument(span)
        .await;

        drop(job);
        self.stats.record(&report);
        report
    }

    /// Statistics over every job run so far
    pub fn stats(&self) -> LoadStats {
        self.stats.snapshot()
    }
}

/// Validate the config, then select or check the forced strategy
fn choose_strategy(
    row_count: usize,
    connection: &dyn Connection,
    config: &LoadConfig,
) -> Result<Strategy> {
    config.validate_config()?;
    let caps = effective_capabilities(connection, config);
    let thresholds = config.thresholds();
    match config.force_strategy {
        Some(forced) => strategy::check_forced(forced, row_count, caps, thresholds),
        None => strategy::select(row_count, caps, thresholds),
    }
}

impl std::fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("config", &self.config)
            .field("catalog", &self.catalog.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

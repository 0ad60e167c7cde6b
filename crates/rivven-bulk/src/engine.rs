//! Transfer engine
//!
//! Executes one strategy against one connection inside a scoped transaction.
//! The transaction is committed only when the whole transfer succeeded; every
//! other exit (error, cancellation, timeout) rolls it back. A rollback that
//! could not be delivered is reported alongside the failure.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::buffer::FinalizedRows;
use crate::catalog::{SchemaCatalog, StructuredType};
use crate::config::LoadConfig;
use crate::connection::{BulkTarget, Connection, SetValuedCall, Transaction};
use crate::error::{Error, Result};
use crate::report::LoadReport;
use crate::strategy::{self, Capabilities, Strategy};

/// Rows between progress traces in row-wise mode
const TRACE_EVERY: usize = 1000;

/// Capabilities a load may use: the driver's flags, with set-valued support
/// masked off unless the config names a procedure and structured type
pub fn effective_capabilities(connection: &dyn Connection, config: &LoadConfig) -> Capabilities {
    let mut caps = connection.capabilities();
    if config.set_valued.is_none() {
        caps.set_valued_params = false;
    }
    caps
}

/// Statement-level work resolved before the transaction starts
enum Plan {
    RowWise {
        sql: String,
    },
    BulkCopy,
    SetValued {
        procedure: String,
        parameter: String,
        structured_type: StructuredType,
    },
}

/// Why a transfer did not commit
struct Abort {
    cause: Error,
    rollback: Option<Error>,
}

impl From<Error> for Abort {
    fn from(cause: Error) -> Self {
        Self {
            cause,
            rollback: None,
        }
    }
}

/// Executes strategies against a connection
pub struct TransferEngine<'a> {
    config: &'a LoadConfig,
    catalog: Option<&'a dyn SchemaCatalog>,
}

impl<'a> TransferEngine<'a> {
    /// Create an engine for a load configuration
    pub fn new(config: &'a LoadConfig) -> Self {
        Self {
            config,
            catalog: None,
        }
    }

    /// Resolve structured types through this catalog instead of the connection's
    pub fn with_catalog(mut self, catalog: &'a dyn SchemaCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Transfer finalized rows with the given strategy.
    ///
    /// Never returns an error: failures, cancellation and timeouts are
    /// reported in the `LoadReport` after the transaction was rolled back.
    pub async fn transfer(
        &self,
        job_id: Uuid,
        rows: FinalizedRows<'_>,
        strategy: Strategy,
        connection: &dyn Connection,
        cancel: &CancellationToken,
    ) -> LoadReport {
        let started = Instant::now();
        let attempted = rows.len() as u64;

        match self.run(rows, strategy, connection, cancel).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(
                    strategy = %strategy,
                    rows = attempted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Load committed"
                );
                LoadReport::new_committed(job_id, attempted, attempted, strategy, elapsed)
            }
            Err(Abort { cause, rollback }) => {
                match &cause {
                    Error::Cancelled => info!(strategy = %strategy, "Load cancelled"),
                    e => warn!(
                        strategy = %strategy,
                        error = %e,
                        category = %e.category(),
                        row_index = ?e.row_index(),
                        "Load failed"
                    ),
                }
                LoadReport::aborted(job_id, attempted, Some(strategy), started.elapsed(), cause)
                    .with_rollback_failure(rollback)
            }
        }
    }

    async fn run(
        &self,
        rows: FinalizedRows<'_>,
        strategy: Strategy,
        connection: &dyn Connection,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Abort> {
        let caps = effective_capabilities(connection, self.config);
        strategy::check_forced(strategy, rows.len(), caps, self.config.thresholds())?;

        let plan = self.plan(rows, strategy, connection).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled.into());
        }

        let tx = match self.config.isolation_level {
            Some(level) => connection.begin_with_isolation(level).await?,
            None => connection.begin().await?,
        };
        let mut scope = TransactionScope::new(tx);
        debug!(strategy = %strategy, rows = rows.len(), "Transaction started");

        let result = {
            let tx = scope.transaction()?;
            let work = with_deadline(self.config.timeout(), self.execute(&plan, rows, tx));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = work => result,
            }
        };

        let written = match result {
            Ok(written) => written,
            Err(cause) => {
                return Err(Abort {
                    cause,
                    rollback: scope.rollback().await.err(),
                });
            }
        };

        if cancel.is_cancelled() {
            return Err(Abort {
                cause: Error::Cancelled,
                rollback: scope.rollback().await.err(),
            });
        }

        scope.commit().await?;
        if written != rows.len() as u64 {
            debug!(
                reported = written,
                rows = rows.len(),
                "Driver reported a different affected-row count"
            );
        }
        debug!(rows = rows.len(), "Transaction committed");
        Ok(())
    }

    async fn plan(
        &self,
        rows: FinalizedRows<'_>,
        strategy: Strategy,
        connection: &dyn Connection,
    ) -> Result<Plan> {
        match strategy {
            Strategy::RowWiseInsert => {
                let columns = rows.schema().column_names();
                let sql = connection.dialect().insert_sql(
                    self.config.schema.as_deref(),
                    &self.config.table,
                    &columns,
                );
                Ok(Plan::RowWise { sql })
            }
            Strategy::StreamedBulkCopy => Ok(Plan::BulkCopy),
            Strategy::SetValuedInsert => {
                let target = self.config.set_valued.as_ref().ok_or_else(|| {
                    Error::no_viable_strategy("set-valued insert needs a procedure and type")
                })?;
                let catalog = self
                    .catalog
                    .or_else(|| connection.catalog())
                    .ok_or_else(|| {
                        Error::config("no schema catalog available to resolve structured types")
                    })?;
                let structured_type = catalog
                    .structured_type(&target.type_name)
                    .await?
                    .ok_or_else(|| {
                        Error::config(format!(
                            "structured type {} is not registered",
                            target.type_name
                        ))
                    })?;
                structured_type.check_schema(rows.schema())?;
                Ok(Plan::SetValued {
                    procedure: target.procedure.clone(),
                    parameter: target.parameter.clone(),
                    structured_type,
                })
            }
        }
    }

    async fn execute(
        &self,
        plan: &Plan,
        rows: FinalizedRows<'_>,
        tx: &dyn Transaction,
    ) -> Result<u64> {
        match plan {
            Plan::RowWise { sql } => insert_rows(sql, rows, tx).await,
            Plan::BulkCopy => {
                let target = BulkTarget {
                    schema: self.config.schema.as_deref(),
                    table: &self.config.table,
                    columns: rows.schema(),
                };
                trace!(table = %target.qualified_name(), rows = rows.len(), "Streaming bulk copy");
                tx.bulk_copy(&target, rows.iter()).await
            }
            Plan::SetValued {
                procedure,
                parameter,
                structured_type,
            } => {
                let call = SetValuedCall {
                    procedure,
                    parameter,
                    structured_type,
                };
                trace!(
                    procedure = %procedure,
                    structured_type = %structured_type.qualified_name(),
                    rows = rows.len(),
                    "Calling set-valued procedure"
                );
                tx.execute_set_valued(&call, rows.iter()).await
            }
        }
    }
}

/// One INSERT per row; the first failure aborts with its row index
async fn insert_rows(sql: &str, rows: FinalizedRows<'_>, tx: &dyn Transaction) -> Result<u64> {
    let mut written = 0u64;
    for (idx, row) in rows.iter().enumerate() {
        written += tx
            .execute(sql, row.values())
            .await
            .map_err(|e| e.at_row(idx as u64))?;
        if (idx + 1) % TRACE_EVERY == 0 {
            trace!(rows = idx + 1, "Row-wise insert progress");
        }
    }
    Ok(written)
}

async fn with_deadline<F>(limit: Option<Duration>, work: F) -> Result<u64>
where
    F: Future<Output = Result<u64>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
            Error::timeout(format!(
                "transfer did not finish within {} ms",
                limit.as_millis()
            ))
        })?,
        None => work.await,
    }
}

/// Owns a transaction until it is committed or rolled back.
///
/// Dropping an unresolved scope schedules a rollback on the current runtime.
struct TransactionScope {
    tx: Option<Box<dyn Transaction>>,
}

impl TransactionScope {
    fn new(tx: Box<dyn Transaction>) -> Self {
        Self { tx: Some(tx) }
    }

    fn transaction(&self) -> Result<&dyn Transaction> {
        self.tx
            .as_deref()
            .ok_or_else(|| Error::invalid_state("transaction already resolved"))
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(Error::invalid_state("transaction already resolved")),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        match tx.rollback().await {
            Ok(()) => {
                debug!("Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Rollback failed");
                Err(e)
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = tx.rollback().await {
                            warn!(error = %e, "Deferred rollback failed");
                        }
                    });
                }
                Err(_) => warn!("Transaction dropped outside a runtime, leaving rollback to the driver"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RowBuffer;
    use crate::memory::{MemoryDatabase, MemoryTable};
    use crate::types::{Column, ColumnType, Row, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Int64).not_null(),
            Column::new("name", ColumnType::Text),
        ])
    }

    fn buffer(n: i64) -> RowBuffer {
        let mut buffer = RowBuffer::new(schema(), 10_000);
        for i in 0..n {
            buffer
                .append(Row::new(vec![Value::Int64(i), Value::from(format!("row {}", i))]))
                .unwrap();
        }
        buffer
    }

    #[tokio::test]
    async fn test_row_wise_commits() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items").with_key("id"));
        let conn = db.connect();
        let config = LoadConfig::new("items");
        let mut rows = buffer(3);

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::RowWiseInsert,
                &conn,
                &CancellationToken::new(),
            )
            .await;

        assert!(report.is_committed(), "{}", report);
        assert_eq!(report.committed(), 3);
        assert_eq!(db.row_count("items"), 3);
    }

    #[tokio::test]
    async fn test_row_wise_failure_rolls_back() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items").with_key("id"));
        let conn = db.connect();
        let config = LoadConfig::new("items");

        let mut rows = RowBuffer::new(schema(), 10);
        for id in [1i64, 2, 1] {
            rows.append(Row::new(vec![Value::Int64(id), Value::Null])).unwrap();
        }

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::RowWiseInsert,
                &conn,
                &CancellationToken::new(),
            )
            .await;

        assert!(!report.is_committed());
        assert_eq!(report.failure().and_then(Error::row_index), Some(2));
        assert_eq!(db.row_count("items"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_strategy_refused() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items"));
        db.set_capabilities(Capabilities::row_wise_only());
        let conn = db.connect();
        let config = LoadConfig::new("items");
        let mut rows = buffer(3);

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::StreamedBulkCopy,
                &conn,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            report.failure(),
            Some(Error::NoViableStrategy { .. })
        ));
        assert_eq!(db.begun_transactions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_begin() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items"));
        let conn = db.connect();
        let config = LoadConfig::new("items");
        let mut rows = buffer(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::StreamedBulkCopy,
                &conn,
                &cancel,
            )
            .await;

        assert!(matches!(report.failure(), Some(Error::Cancelled)));
        assert_eq!(db.begun_transactions(), 0);
        assert_eq!(db.row_count("items"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items"));
        db.set_row_delay(Duration::from_millis(10));
        let conn = db.connect();
        let config = LoadConfig::new("items").with_timeout(Duration::from_millis(25));
        let mut rows = buffer(100);

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::StreamedBulkCopy,
                &conn,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(report.failure(), Some(Error::Timeout { .. })));
        assert!(report.failure().map(Error::is_retriable).unwrap_or(false));
        assert_eq!(db.row_count("items"), 0);
        // The abandoned request took the connection down with it
        assert!(report.rollback_failure().is_some());
        assert!(!conn.is_valid().await);
    }

    #[tokio::test]
    async fn test_set_valued_requires_catalog_entry() {
        let db = MemoryDatabase::new();
        db.create_table(MemoryTable::new("items"));
        db.register_procedure("usp_ItemsInsert", "items");
        let conn = db.connect();
        let config = LoadConfig::new("items").with_set_valued(
            crate::config::SetValuedConfig::new("usp_ItemsInsert", "ItemsType"),
        );
        let mut rows = buffer(3);

        let report = TransferEngine::new(&config)
            .transfer(
                Uuid::new_v4(),
                rows.finalize(),
                Strategy::SetValuedInsert,
                &conn,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            report.failure(),
            Some(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_effective_capabilities_masks_set_valued() {
        let db = MemoryDatabase::new();
        let conn = db.connect();

        let caps = effective_capabilities(&conn, &LoadConfig::new("t"));
        assert!(caps.bulk_copy);
        assert!(!caps.set_valued_params);

        let config = LoadConfig::new("t")
            .with_set_valued(crate::config::SetValuedConfig::new("p", "T"));
        assert!(effective_capabilities(&conn, &config).set_valued_params);
    }
}

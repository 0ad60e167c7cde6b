//! In-process memory database
//!
//! Implements every loading capability against plain in-memory tables:
//! - row-wise INSERTs in its own dialect
//! - a bulk channel pulling rows straight from the iterator
//! - set-valued calls to registered procedures (procedure -> table)
//! - a structured-type catalog
//!
//! Writes are staged in the transaction and applied on commit, so a dropped or
//! rolled-back transaction leaves no rows behind. Tables may declare a key
//! column whose values must be unique and not null, and a column layout that
//! bulk copies must match.
//!
//! A request abandoned before it finished (its future dropped) leaves the
//! connection lost, like a driver whose wire protocol was cut mid-message.
//!
//! Fault injection (`fail_at_row`, `lose_connection_at_row`, `set_row_delay`)
//! lets tests drive the failure, cancellation and timeout paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::buffer::RowIter;
use crate::catalog::{SchemaCatalog, StaticCatalog, StructuredType};
use crate::connection::{
    BulkTarget, Connection, ConnectionConfig, ConnectionFactory, DatabaseType, IsolationLevel,
    RequestGuard, SetValuedCall, Transaction,
};
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::strategy::Capabilities;
use crate::types::{Row, Schema, Value};

/// Definition of an in-memory table
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    key: Option<String>,
    columns: Option<Schema>,
}

impl MemoryTable {
    /// Create a table without a key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            columns: None,
        }
    }

    /// Declare a unique, not-null key column
    pub fn with_key(mut self, column: impl Into<String>) -> Self {
        self.key = Some(column.into());
        self
    }

    /// Declare the column layout; without one any columns are accepted
    pub fn with_columns(mut self, columns: Schema) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Columns a statement writes
#[derive(Clone, Copy)]
enum Layout<'a> {
    /// Named columns, a subset of the table's
    Named(&'a [&'a str]),
    /// Every column of the table, in table order
    Copy(&'a Schema),
}

#[derive(Debug, Default)]
struct TableData {
    key: Option<String>,
    columns: Option<Schema>,
    rows: Vec<Row>,
    keys: Vec<Value>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    fail_at_row: Option<u64>,
    lose_connection_at_row: Option<u64>,
    row_delay: Option<Duration>,
}

#[derive(Debug)]
struct State {
    tables: HashMap<String, TableData>,
    procedures: HashMap<String, String>,
    capabilities: Capabilities,
    faults: Faults,
    last_isolation: Option<IsolationLevel>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    catalog: StaticCatalog,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

/// Shared handle to an in-memory database
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Create an empty database supporting every capability
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    tables: HashMap::new(),
                    procedures: HashMap::new(),
                    capabilities: Capabilities::all(),
                    faults: Faults::default(),
                    last_isolation: None,
                }),
                catalog: StaticCatalog::new(),
                begun: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
            }),
        }
    }

    /// Create (or replace) a table
    pub fn create_table(&self, table: MemoryTable) {
        self.inner.state.lock().tables.insert(
            table_key(&table.name),
            TableData {
                key: table.key,
                columns: table.columns,
                ..Default::default()
            },
        );
    }

    /// Register a procedure that inserts its row set into `table`
    pub fn register_procedure(&self, procedure: impl AsRef<str>, table: impl AsRef<str>) {
        self.inner
            .state
            .lock()
            .procedures
            .insert(table_key(procedure.as_ref()), table_key(table.as_ref()));
    }

    /// Register a structured type in the catalog
    pub fn register_type(&self, structured_type: StructuredType) -> Result<()> {
        self.inner.catalog.register(structured_type)
    }

    /// Override the advertised capabilities
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.inner.state.lock().capabilities = capabilities;
    }

    /// Reject the row with this zero-based index (per transaction) as a
    /// constraint violation
    pub fn fail_at_row(&self, index: u64) {
        self.inner.state.lock().faults.fail_at_row = Some(index);
    }

    /// Drop the connection when the row with this index is written
    pub fn lose_connection_at_row(&self, index: u64) {
        self.inner.state.lock().faults.lose_connection_at_row = Some(index);
    }

    /// Sleep this long per written row
    pub fn set_row_delay(&self, delay: Duration) {
        self.inner.state.lock().faults.row_delay = Some(delay);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.inner.state.lock().faults = Faults::default();
    }

    /// Open a connection
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            inner: Arc::clone(&self.inner),
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Committed rows of a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .state
            .lock()
            .tables
            .get(&table_key(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of committed rows in a table
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .state
            .lock()
            .tables
            .get(&table_key(table))
            .map_or(0, |t| t.rows.len())
    }

    /// Transactions begun so far
    pub fn begun_transactions(&self) -> u64 {
        self.inner.begun.load(Ordering::Relaxed)
    }

    /// Transactions committed so far
    pub fn committed_transactions(&self) -> u64 {
        self.inner.committed.load(Ordering::Relaxed)
    }

    /// Transactions rolled back (explicitly or by drop) so far
    pub fn rolled_back_transactions(&self) -> u64 {
        self.inner.rolled_back.load(Ordering::Relaxed)
    }

    /// Isolation level requested by the most recent transaction
    pub fn last_isolation_level(&self) -> Option<IsolationLevel> {
        self.inner.state.lock().last_isolation
    }
}

#[async_trait]
impl ConnectionFactory for MemoryDatabase {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryDatabase::connect(self)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Memory
    }
}

/// Connection to a `MemoryDatabase`
#[derive(Debug)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
    lost: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn capabilities(&self) -> Capabilities {
        self.inner.state.lock().capabilities
    }

    fn dialect(&self) -> &dyn SqlDialect {
        DatabaseType::Memory.dialect()
    }

    fn catalog(&self) -> Option<&dyn SchemaCatalog> {
        Some(&self.inner.catalog)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::connection_lost("memory connection was lost"));
        }
        self.inner.begun.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            lost: Arc::clone(&self.lost),
            staged: Mutex::new(Staged::default()),
            resolved: AtomicBool::new(false),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.lost.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Staged {
    written: u64,
    rows: Vec<(String, Option<Value>, Row)>,
}

/// Transaction on a `MemoryConnection`
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    lost: Arc<AtomicBool>,
    staged: Mutex<Staged>,
    resolved: AtomicBool,
}

impl MemoryTransaction {
    /// Stage one row, applying faults and key checks.
    ///
    /// `index` is the position reported on a constraint violation.
    async fn stage(
        &self,
        table: &str,
        key_position: Option<usize>,
        row: Row,
        index: Option<u64>,
    ) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(Error::connection_lost("memory connection was lost"));
        }

        let faults = self.inner.state.lock().faults;
        if let Some(delay) = faults.row_delay {
            tokio::time::sleep(delay).await;
        }

        let mut staged = self.staged.lock();
        let ordinal = staged.written;
        if faults.lose_connection_at_row == Some(ordinal) {
            self.lost.store(true, Ordering::Release);
            return Err(Error::connection_lost(format!(
                "connection lost while writing row {}",
                ordinal
            )));
        }
        if faults.fail_at_row == Some(ordinal) {
            return Err(Error::constraint(
                format!("injected failure at row {}", ordinal),
                index,
            ));
        }

        let key = match key_position {
            Some(pos) => {
                let value = row.get(pos).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    return Err(Error::constraint(
                        format!("cannot insert NULL into the key of {}", table),
                        index,
                    ));
                }
                let state = self.inner.state.lock();
                let committed = state
                    .tables
                    .get(table)
                    .map_or(false, |t| t.keys.contains(&value));
                let pending = staged
                    .rows
                    .iter()
                    .any(|(t, k, _)| t == table && k.as_ref() == Some(&value));
                if committed || pending {
                    return Err(Error::constraint(
                        format!("duplicate key {:?} in {}", value, table),
                        index,
                    ));
                }
                Some(value)
            }
            None => None,
        };

        staged.rows.push((table.to_string(), key, row));
        staged.written += 1;
        Ok(())
    }

    /// Resolve the table, check the written columns against its layout and
    /// find the key column position among them
    fn resolve_table(&self, table: &str, layout: Layout<'_>) -> Result<(String, Option<usize>)> {
        let key = table_key(table);
        let state = self.inner.state.lock();
        let data = state
            .tables
            .get(&key)
            .ok_or_else(|| Error::query(format!("table {} does not exist", table)))?;

        let copied;
        let names: &[&str] = match layout {
            Layout::Named(names) => names,
            Layout::Copy(schema) => {
                copied = schema.column_names();
                &copied
            }
        };

        if let Some(defined) = &data.columns {
            match layout {
                Layout::Copy(schema) => defined.check_copy_source(table, schema)?,
                Layout::Named(names) => {
                    if let Some(missing) = names.iter().find(|n| defined.column(n).is_none()) {
                        return Err(Error::schema_mismatch(format!(
                            "table {} has no column '{}'",
                            table, missing
                        )));
                    }
                }
            }
        }

        let position = match &data.key {
            Some(key_column) => Some(
                names
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(key_column))
                    .ok_or_else(|| {
                        Error::constraint(
                            format!("key column {} of {} is not loaded", key_column, table),
                            None,
                        )
                    })?,
            ),
            None => None,
        };
        Ok((key, position))
    }

    fn mark_resolved(&self) -> Result<()> {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return Err(Error::transaction("transaction already resolved"));
        }
        Ok(())
    }
}

impl MemoryTransaction {
    async fn insert_row(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (table, columns) = parse_insert(sql)
            .ok_or_else(|| Error::query_with_sql("only single-row INSERT is supported", sql))?;
        if columns.len() != params.len() {
            return Err(Error::query_with_sql(
                format!("{} columns but {} parameters", columns.len(), params.len()),
                sql,
            ));
        }
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        let (table, key_position) = self.resolve_table(&table, Layout::Named(&names))?;
        self.stage(&table, key_position, Row::new(params.to_vec()), None)
            .await?;
        Ok(1)
    }

    async fn copy_rows(&self, target: &BulkTarget<'_>, rows: RowIter<'_>) -> Result<u64> {
        if !self.inner.state.lock().capabilities.bulk_copy {
            return Err(Error::unsupported("bulk copy is disabled"));
        }
        let (table, key_position) =
            self.resolve_table(&target.qualified_name(), Layout::Copy(target.columns))?;

        let mut written = 0u64;
        for (idx, row) in rows.enumerate() {
            self.stage(&table, key_position, row.clone(), Some(idx as u64))
                .await?;
            written += 1;
        }
        trace!(table = %table, rows = written, "Bulk copy staged");
        Ok(written)
    }

    async fn call_procedure(&self, call: &SetValuedCall<'_>, rows: RowIter<'_>) -> Result<u64> {
        let table = {
            let state = self.inner.state.lock();
            if !state.capabilities.set_valued_params {
                return Err(Error::unsupported("set-valued parameters are disabled"));
            }
            state
                .procedures
                .get(&table_key(call.procedure))
                .cloned()
                .ok_or_else(|| {
                    Error::query(format!("procedure {} does not exist", call.procedure))
                })?
        };
        let names: Vec<&str> = call
            .structured_type
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let (table, key_position) = self.resolve_table(&table, Layout::Named(&names))?;

        // The procedure consumes the row set as a whole: no row positions
        let mut written = 0u64;
        for row in rows {
            self.stage(&table, key_position, row.clone(), None).await?;
            written += 1;
        }
        Ok(written)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let request = RequestGuard::start(&self.lost);
        let result = self.insert_row(sql, params).await;
        request.finish();
        result
    }

    async fn bulk_copy(&self, target: &BulkTarget<'_>, rows: RowIter<'_>) -> Result<u64> {
        let request = RequestGuard::start(&self.lost);
        let result = self.copy_rows(target, rows).await;
        request.finish();
        result
    }

    async fn execute_set_valued(&self, call: &SetValuedCall<'_>, rows: RowIter<'_>) -> Result<u64> {
        let request = RequestGuard::start(&self.lost);
        let result = self.call_procedure(call, rows).await;
        request.finish();
        result
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.inner.state.lock().last_isolation = Some(level);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.mark_resolved()?;
        if self.lost.load(Ordering::Acquire) {
            self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
            return Err(Error::connection_lost("memory connection was lost"));
        }

        let staged = std::mem::take(&mut *self.staged.lock());
        let mut state = self.inner.state.lock();
        for (table, key, row) in staged.rows {
            let data = state.tables.entry(table).or_default();
            if let Some(key) = key {
                data.keys.push(key);
            }
            data.rows.push(row);
        }
        self.inner.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.mark_resolved()?;
        self.staged.lock().rows.clear();
        self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
        if self.lost.load(Ordering::Acquire) {
            // Staged rows die with the session; the request itself never arrives
            return Err(Error::connection_lost(
                "rollback not delivered: memory connection was lost",
            ));
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.resolved.swap(true, Ordering::AcqRel) {
            self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn table_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Parse `INSERT INTO "s"."t" ("a", "b") VALUES (...)` into table and columns
fn parse_insert(sql: &str) -> Option<(String, Vec<String>)> {
    let rest = sql.strip_prefix("INSERT INTO ")?;
    let (name, rest) = rest.split_once(" (")?;
    let (columns, _) = rest.split_once(") VALUES ")?;

    let table = name
        .split("\".\"")
        .map(unquote)
        .collect::<Vec<_>>()
        .join(".");
    let columns = columns.split(", ").map(unquote).collect();
    Some((table, columns))
}

fn unquote(ident: &str) -> String {
    ident.trim_matches('"').replace("\"\"", "\"")
}

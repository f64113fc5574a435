//! Query execution.
//!
//! `QueryExecutor` runs one request end to end: validate, build the
//! connection descriptor, open one connection, execute per mode, shape the
//! output, and close the connection on every path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{
    first_value, ColumnInfo, Driver, DriverOutput, ExecuteKind, MessageListener, MessageSink,
    PostgresDriver, Row, Table, Value, SCALAR_COLUMN,
};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{InvokeError, Result};
use crate::params::bind_batch;
use crate::request::{ExecutionMode, ExecutionRequest};

/// Name of the column added by `append_server_instance`.
pub const SERVER_INSTANCE_COLUMN: &str = "ServerInstance";

/// Normalized output of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Result tables in server order. Empty for `NonQuery`, and for
    /// `SingleResultSet` when the result set has no rows.
    pub tables: Vec<Table>,

    /// The mode after `Auto` was resolved.
    pub mode: ExecutionMode,

    /// Rows affected, reported for `NonQuery` only.
    pub rows_affected: Option<u64>,

    /// Echoes whether message capture was requested.
    pub messages_requested: bool,

    /// Captured server messages in arrival order.
    pub messages: Vec<String>,
}

impl ExecutionResult {
    /// Returns the first table, if any.
    pub fn first_table(&self) -> Option<&Table> {
        self.tables.first()
    }

    /// Returns the scalar value of a `Scalar` execution.
    pub fn scalar(&self) -> Option<&Value> {
        self.first_table()?.rows.first()?.values().next()
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Executes requests against a driver.
///
/// Holds no per-call state; one executor can serve concurrent calls.
#[derive(Clone)]
pub struct QueryExecutor {
    driver: Arc<dyn Driver>,
    listener: Option<MessageListener>,
}

impl QueryExecutor {
    /// Creates an executor over the given driver.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            listener: None,
        }
    }

    /// Creates an executor backed by PostgreSQL.
    pub fn postgres() -> Self {
        Self::new(Arc::new(PostgresDriver::new()))
    }

    /// Registers a callback invoked for each server message, as it arrives,
    /// on executions that request message capture.
    ///
    /// The callback runs inside the tracing dispatch; events it emits itself are not delivered.
    pub fn with_message_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Runs one request.
    ///
    /// Validation errors are raised before any connection attempt. Driver
    /// failures become `QueryExecutionFailed` after the connection is closed.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let parameters = request.validate()?;
        let sql = request.source.load()?;
        let mode = request.mode.resolve(&sql);
        let descriptor = ConnectionDescriptor::for_target(&request.target)?;
        let batch = bind_batch(&sql, &parameters);

        let sink = request
            .capture_messages
            .then(|| MessageSink::new(self.listener.clone()));

        debug!(
            "Executing {} statement(s) in {} mode against {}",
            batch.statements.len(),
            mode,
            descriptor
        );

        let mut connection = within(
            request.connect_timeout,
            "Connection",
            self.driver.open(&descriptor, sink.clone()),
        )
        .await?;

        let outcome = within(
            request.query_timeout,
            "Query",
            connection.execute(&batch, execute_kind(mode)),
        )
        .await;

        if let Err(e) = connection.close().await {
            match &outcome {
                Ok(_) => warn!("Failed to close connection: {}", e),
                Err(_) => debug!("Failed to close connection after error: {}", e),
            }
        }
        drop(connection);

        let (mut tables, rows_affected) = shape(mode, outcome?);

        if request.append_server_instance {
            let instance = request.server_instance();
            for table in &mut tables {
                table.append_constant_column(SERVER_INSTANCE_COLUMN, instance.clone());
            }
        }

        Ok(ExecutionResult {
            tables,
            mode,
            rows_affected,
            messages_requested: request.capture_messages,
            messages: sink.map(|s| s.messages()).unwrap_or_default(),
        })
    }

    /// Runs one request on a private current-thread runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn execute_blocking(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| InvokeError::execution(format!("Failed to start runtime: {e}")))?;
        runtime.block_on(self.execute(request))
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

fn execute_kind(mode: ExecutionMode) -> ExecuteKind {
    match mode {
        ExecutionMode::Scalar => ExecuteKind::Scalar,
        ExecutionMode::NonQuery => ExecuteKind::NonQuery,
        ExecutionMode::Auto
        | ExecutionMode::SingleResultSet
        | ExecutionMode::MultipleResultSets => ExecuteKind::Reader,
    }
}

/// Applies a timeout; zero means no limit.
async fn within<T>(
    limit: Duration,
    what: &str,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    if limit.is_zero() {
        return work.await;
    }
    tokio::time::timeout(limit, work).await.map_err(|_| {
        InvokeError::execution(format!(
            "{what} timed out after {} seconds",
            limit.as_secs_f64()
        ))
    })?
}

/// Turns driver output into the table sequence for the mode.
fn shape(mode: ExecutionMode, output: DriverOutput) -> (Vec<Table>, Option<u64>) {
    match (mode, output) {
        (ExecutionMode::NonQuery, DriverOutput::Affected(rows)) => (Vec::new(), Some(rows)),
        (ExecutionMode::NonQuery, _) => (Vec::new(), None),

        (ExecutionMode::Scalar, DriverOutput::Scalar(scalar)) => (vec![scalar_table(scalar)], None),
        (ExecutionMode::Scalar, DriverOutput::ResultSets(sets)) => {
            (vec![scalar_table(first_value(&sets))], None)
        }

        (ExecutionMode::MultipleResultSets, DriverOutput::ResultSets(sets)) => (sets, None),

        (_, DriverOutput::ResultSets(sets)) => (
            sets.into_iter()
                .next()
                .filter(|table| !table.is_empty())
                .into_iter()
                .collect(),
            None,
        ),

        (_, _) => (Vec::new(), None),
    }
}

/// One-row, one-column table holding a scalar (NULL when there was none).
fn scalar_table(scalar: Option<(String, Value)>) -> Table {
    let (column, value) = scalar.unwrap_or_else(|| (SCALAR_COLUMN.to_string(), Value::Null));
    let mut row = Row::new();
    row.push(column.clone(), value.clone());
    Table::new(
        vec![ColumnInfo::new(column, value.type_name())],
        vec![row],
    )
}

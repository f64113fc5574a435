//! Database abstraction layer for db-invoke.
//!
//! Provides a trait-based interface to the wrapped client library so the
//! executor can shape output without knowing which driver produced it.

mod mock;
mod notice;
mod postgres;
mod types;

pub use mock::{ExecutedBatch, MockDriver};
pub use notice::{MessageListener, MessageSink};
pub use postgres::PostgresDriver;
pub use types::{ColumnInfo, Row, Table, Value};

use crate::descriptor::ConnectionDescriptor;
use crate::error::Result;
use async_trait::async_trait;

/// Column name given to a scalar whose source column is unknown.
pub const SCALAR_COLUMN: &str = "Column1";

/// One statement ready for the driver: positional SQL plus its binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub sql: String,
    /// Values for `$1..$n`, in order.
    pub binds: Vec<Value>,
    /// Parameter names the binds came from, when known.
    pub names: Vec<String>,
}

impl Command {
    pub fn new(sql: impl Into<String>, binds: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            binds,
            names: Vec::new(),
        }
    }
}

/// The statements of one query, run in order on one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub statements: Vec<Command>,
}

impl Batch {
    pub fn new(statements: Vec<Command>) -> Self {
        Self { statements }
    }

    /// A batch of one statement.
    pub fn single(sql: impl Into<String>, binds: Vec<Value>) -> Self {
        Self::new(vec![Command::new(sql, binds)])
    }
}

/// The three ways a driver can run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteKind {
    /// Forward-only read of every result set.
    Reader,
    /// First column of the first row.
    Scalar,
    /// For effect only.
    NonQuery,
}

/// Raw output of a driver call, before shaping.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutput {
    /// Result sets in server order.
    ResultSets(Vec<Table>),
    /// Column name and value, or None when the command produced no rows.
    Scalar(Option<(String, Value)>),
    /// Number of rows affected.
    Affected(u64),
}

/// Extracts the first column of the first row of the first result set.
///
/// A first result set without rows yields its first column with NULL; later
/// result sets are never consulted.
pub fn first_value(result_sets: &[Table]) -> Option<(String, Value)> {
    let table = result_sets.first()?;
    let column = table.columns.first()?;
    let value = table
        .rows
        .first()
        .and_then(|row| row.values().next().cloned())
        .unwrap_or_default();
    Some((column.name.clone(), value))
}

/// Opens connections.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens one connection. When `messages` is given, every informational
    /// message the server sends while the connection is open is pushed to it.
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        messages: Option<MessageSink>,
    ) -> Result<Box<dyn Connection>>;
}

/// One open connection, owned by a single execution.
#[async_trait]
pub trait Connection: Send {
    /// Executes every statement of the batch, in order.
    ///
    /// Readers report one table per statement that returns rows, including
    /// statements that return zero rows; statements without a result
    /// (DDL, plain DML) report none.
    async fn execute(&mut self, batch: &Batch, kind: ExecuteKind) -> Result<DriverOutput>;

    /// Closes the connection. Calling it twice is harmless.
    async fn close(&mut self) -> Result<()>;
}

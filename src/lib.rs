//! db-invoke - run one query against a database and get the output back in a uniform shape.
//!
//! A request names a server, a query (inline or from a file) and an
//! execution mode; the executor opens one connection, runs the query,
//! normalizes zero, one or many result sets, a scalar, or a row count into an
//! [`ExecutionResult`], optionally collects the server's informational
//! messages, and closes the connection.
//!
//! ```no_run
//! # async fn demo() -> db_invoke::Result<()> {
//! let request = db_invoke::ExecutionRequest::builder()
//!     .server("localhost")
//!     .database("demo")
//!     .query("SELECT * FROM computer WHERE owner = @owner")
//!     .parameter("owner", "ops")
//!     .build()?;
//!
//! let result = db_invoke::execute(&request).await?;
//! for table in &result.tables {
//!     println!("{} rows", table.rows.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod logging;
pub mod params;
pub mod request;

pub use db::{ColumnInfo, Row, Table, Value};
pub use error::{InvokeError, Result};
pub use executor::{ExecutionResult, QueryExecutor};
pub use request::{Auth, ExecutionMode, ExecutionRequest, QuerySource, Secret, ServerTarget, Target};

/// Runs one request against PostgreSQL.
pub async fn execute(request: &ExecutionRequest) -> Result<ExecutionResult> {
    QueryExecutor::postgres().execute(request).await
}

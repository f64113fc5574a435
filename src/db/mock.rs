//! Mock database driver for testing.
//!
//! Replays a scripted response and records what it was asked to do, so
//! executor behavior can be checked without a server.

use super::{
    first_value, Batch, ColumnInfo, Connection, Driver, DriverOutput, ExecuteKind, MessageSink,
    Table,
};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{InvokeError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A batch as received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedBatch {
    pub batch: Batch,
    pub kind: ExecuteKind,
    pub descriptor: String,
}

#[derive(Debug, Clone, Default)]
struct Script {
    result_sets: Vec<Table>,
    rows_affected: u64,
    notices: Vec<String>,
    open_error: Option<String>,
    execute_error: Option<String>,
}

#[derive(Debug, Default)]
struct Stats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    executed: Mutex<Vec<ExecutedBatch>>,
}

/// A mock driver that returns predefined results.
///
/// Clones share their statistics, so a test can keep one handle and give
/// another to the executor.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    script: Script,
    stats: Arc<Stats>,
}

impl MockDriver {
    /// Creates a mock that returns no result sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a result set to return from reads.
    pub fn with_result_set(mut self, table: Table) -> Self {
        self.script.result_sets.push(table);
        self
    }

    /// Adds a result set with columns but no rows, as an empty SELECT gives.
    pub fn with_empty_result_set(self, columns: &[&str]) -> Self {
        let columns = columns
            .iter()
            .map(|name| ColumnInfo::new(*name, "int4"))
            .collect();
        self.with_result_set(Table::new(columns, Vec::new()))
    }

    /// Sets the affected-row count returned for non-queries.
    pub fn with_rows_affected(mut self, rows: u64) -> Self {
        self.script.rows_affected = rows;
        self
    }

    /// Messages the "server" emits during every execution.
    pub fn with_notices<I, S>(mut self, notices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.notices = notices.into_iter().map(Into::into).collect();
        self
    }

    /// Makes `open` fail with the given driver message.
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.script.open_error = Some(message.into());
        self
    }

    /// Makes `execute` fail with the given driver message.
    pub fn failing_execute(mut self, message: impl Into<String>) -> Self {
        self.script.execute_error = Some(message.into());
        self
    }

    /// Number of successful opens.
    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed.
    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Batches received, in order.
    pub fn executed(&self) -> Vec<ExecutedBatch> {
        self.stats
            .executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        messages: Option<MessageSink>,
    ) -> Result<Box<dyn Connection>> {
        if let Some(message) = &self.script.open_error {
            return Err(InvokeError::execution(message.clone()));
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
            stats: Arc::clone(&self.stats),
            descriptor: descriptor.as_str().to_string(),
            messages,
            open: true,
        }))
    }
}

struct MockConnection {
    script: Script,
    stats: Arc<Stats>,
    descriptor: String,
    messages: Option<MessageSink>,
    open: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, batch: &Batch, kind: ExecuteKind) -> Result<DriverOutput> {
        if !self.open {
            return Err(InvokeError::execution("Connection is already closed"));
        }

        self.stats
            .executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ExecutedBatch {
                batch: batch.clone(),
                kind,
                descriptor: self.descriptor.clone(),
            });

        // The server emits messages whether or not anyone listens.
        if let Some(sink) = &self.messages {
            for notice in &self.script.notices {
                sink.push(notice.clone());
            }
        }

        if let Some(message) = &self.script.execute_error {
            return Err(InvokeError::execution(message.clone()));
        }

        Ok(match kind {
            ExecuteKind::Reader => DriverOutput::ResultSets(self.script.result_sets.clone()),
            ExecuteKind::Scalar => DriverOutput::Scalar(first_value(&self.script.result_sets)),
            ExecuteKind::NonQuery => DriverOutput::Affected(self.script.rows_affected),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

//! PostgreSQL driver implementation.
//!
//! Provides `PostgresDriver`, which implements the `Driver` trait using a
//! single sqlx `PgConnection` per execution. Statements run one at a time:
//! without binds over the simple-query protocol (text results), with binds
//! over the extended protocol (binary results).

use super::notice::{NoticeCapture, PG_NOTICE_TARGET};
use super::{
    first_value, Batch, ColumnInfo, Command, Connection, Driver, DriverOutput, ExecuteKind,
    MessageSink, Row, Table, Value,
};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{InvokeError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgColumn, PgConnectOptions, PgConnection, PgRow, PgTypeInfo,
    PgValueFormat, Postgres,
};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono::Timelike;
use sqlx::types::Uuid;
use sqlx::{
    Column as SqlxColumn, Connection as SqlxConnection, Either, Row as SqlxRow,
    Statement as SqlxStatement, TypeInfo, ValueRef,
};
use std::future::Future;
use std::str::FromStr;
use tracing::instrument::WithSubscriber;
use tracing::{debug, Dispatch};

/// PostgreSQL driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        messages: Option<MessageSink>,
    ) -> Result<Box<dyn Connection>> {
        let options = PgConnectOptions::from_str(descriptor.as_str())
            .map_err(|e| InvokeError::execution(e.to_string()))?;

        let capture = messages.map(|sink| NoticeCapture::dispatch(sink, PG_NOTICE_TARGET));

        debug!("Connecting to {}", descriptor);
        let conn = with_capture(capture.clone(), PgConnection::connect_with(&options))
            .await
            .map_err(|e| InvokeError::execution(format_connection_error(e)))?;
        debug!("Successfully connected to database");

        Ok(Box::new(PostgresConnection {
            conn: Some(conn),
            capture,
        }))
    }
}

/// One open PostgreSQL connection.
///
/// Dropping it without `close()` still closes the socket.
struct PostgresConnection {
    conn: Option<PgConnection>,
    capture: Option<Dispatch>,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, batch: &Batch, kind: ExecuteKind) -> Result<DriverOutput> {
        let capture = self.capture.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| InvokeError::execution("Connection is already closed"))?;

        with_capture(capture, run_batch(conn, batch, kind)).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            with_capture(self.capture.clone(), conn.close()).await?;
            debug!("Connection closed");
        }
        Ok(())
    }
}

/// Drives `work` with the notice capture installed, if any.
async fn with_capture<F: Future>(capture: Option<Dispatch>, work: F) -> F::Output {
    match capture {
        Some(dispatch) => work.with_subscriber(dispatch).await,
        None => work.await,
    }
}

async fn run_batch(
    conn: &mut PgConnection,
    batch: &Batch,
    kind: ExecuteKind,
) -> Result<DriverOutput> {
    if kind == ExecuteKind::NonQuery {
        let mut affected = 0;
        for statement in &batch.statements {
            affected += execute_statement(conn, statement).await?;
        }
        debug!("{} rows affected", affected);
        return Ok(DriverOutput::Affected(affected));
    }

    let mut result_sets = Vec::new();
    for statement in &batch.statements {
        if let Some(table) = fetch_statement(conn, statement).await? {
            result_sets.push(table);
        }
    }
    debug!("Fetched {} result set(s)", result_sets.len());

    Ok(match kind {
        ExecuteKind::Scalar => DriverOutput::Scalar(first_value(&result_sets)),
        _ => DriverOutput::ResultSets(result_sets),
    })
}

/// Runs one statement for effect and returns the rows it affected.
async fn execute_statement(conn: &mut PgConnection, statement: &Command) -> Result<u64> {
    let executed = if statement.binds.is_empty() {
        sqlx::Executor::execute(&mut *conn, statement.sql.as_str()).await
    } else {
        bind_all(sqlx::query(&statement.sql), &statement.binds)
            .execute(&mut *conn)
            .await
    };
    let result = executed.map_err(query_error)?;
    Ok(result.rows_affected())
}

/// Runs one statement and reads its result set.
///
/// Returns `None` for statements without a result (DDL, plain DML). A
/// statement that returns rows yields a table even when it returned none of
/// them; its columns then come from the statement's description.
async fn fetch_statement(conn: &mut PgConnection, statement: &Command) -> Result<Option<Table>> {
    let rows = if statement.binds.is_empty() {
        let mut rows = Vec::new();
        let mut stream = sqlx::Executor::fetch_many(&mut *conn, statement.sql.as_str());
        while let Some(item) = stream.try_next().await.map_err(query_error)? {
            if let Either::Right(row) = item {
                rows.push(row);
            }
        }
        rows
    } else {
        bind_all(sqlx::query(&statement.sql), &statement.binds)
            .fetch_all(&mut *conn)
            .await
            .map_err(query_error)?
    };

    let columns = match rows.first() {
        Some(row) => column_info(row.columns()),
        None => describe_columns(conn, statement).await?,
    };
    if columns.is_empty() {
        return Ok(None);
    }

    let rows = rows
        .iter()
        .map(|row| convert_row(row, &columns))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(Table::new(columns, rows)))
}

/// Columns the statement returns; empty when it returns no rows at all.
async fn describe_columns(conn: &mut PgConnection, statement: &Command) -> Result<Vec<ColumnInfo>> {
    let types: Vec<PgTypeInfo> = statement.binds.iter().map(bind_type).collect();
    let prepared = sqlx::Executor::prepare_with(&mut *conn, statement.sql.as_str(), &types)
        .await
        .map_err(query_error)?;
    Ok(column_info(prepared.columns()))
}

fn query_error(error: sqlx::Error) -> InvokeError {
    InvokeError::execution(format_query_error(error))
}

/// Binds each value to the next positional parameter.
fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    binds: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in binds {
        query = match value {
            Value::Null => query.bind(UntypedNull),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::String(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// The parameter type `bind_all` declares for a value.
fn bind_type(value: &Value) -> PgTypeInfo {
    match value {
        Value::Null => <UntypedNull as sqlx::Type<Postgres>>::type_info(),
        Value::Bool(_) => <bool as sqlx::Type<Postgres>>::type_info(),
        Value::Int(_) => <i64 as sqlx::Type<Postgres>>::type_info(),
        Value::Float(_) => <f64 as sqlx::Type<Postgres>>::type_info(),
        Value::String(_) => <String as sqlx::Type<Postgres>>::type_info(),
        Value::Bytes(_) => <Vec<u8> as sqlx::Type<Postgres>>::type_info(),
    }
}

/// SQL NULL declared with OID 0, so the server infers its type from context.
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(
        &self,
        _buf: &mut PgArgumentBuffer,
    ) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn column_info(columns: &[PgColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

fn convert_row(row: &PgRow, columns: &[ColumnInfo]) -> Result<Row> {
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::from_columns(columns, values))
}

/// Converts one cell.
///
/// Text-format cells (simple protocol) of types without a native `Value`
/// arrive as their server text. Binary cells (bound statements) are decoded
/// per type and rendered the way the server would print them; a type with
/// no decoder is an error rather than a guess.
fn convert_value(row: &PgRow, index: usize, column: &ColumnInfo) -> Result<Value> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| decode_error(column, e.into()))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match (column.data_type.as_str(), raw.format()) {
        ("BOOL", _) => decode::<bool>(row, index).map(Value::from),
        ("INT2", _) => decode::<i16>(row, index).map(Value::from),
        ("INT4", _) => decode::<i32>(row, index).map(Value::from),
        ("INT8", _) => decode::<i64>(row, index).map(Value::from),
        ("FLOAT4", _) => decode::<f32>(row, index).map(Value::from),
        ("FLOAT8", _) => decode::<f64>(row, index).map(Value::from),
        ("BYTEA", _) => decode::<Vec<u8>>(row, index).map(Value::from),
        (_, PgValueFormat::Text) => raw.as_str().map(Value::from),

        ("TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "XML" | "JSON" | "UNKNOWN", _) => {
            raw.as_str().map(Value::from)
        }
        // Binary jsonb is a version byte followed by the text.
        ("JSONB", _) => raw
            .as_bytes()
            .and_then(|bytes| Ok(std::str::from_utf8(bytes.get(1..).unwrap_or_default())?))
            .map(Value::from),
        ("OID", _) => decode::<Oid>(row, index).map(|oid| Value::Int(oid.0.into())),
        ("NUMERIC", _) => raw.as_bytes().and_then(format_numeric).map(Value::String),
        ("UUID", _) => decode::<Uuid>(row, index).map(|u| Value::String(u.to_string())),
        ("DATE", _) => decode::<NaiveDate>(row, index).map(|d| Value::String(d.to_string())),
        ("TIME", _) => decode::<NaiveTime>(row, index).map(|t| Value::String(format_time(t))),
        ("TIMESTAMP", _) => {
            decode::<NaiveDateTime>(row, index).map(|ts| Value::String(format_timestamp(ts)))
        }
        ("TIMESTAMPTZ", _) => decode::<DateTime<Utc>>(row, index)
            .map(|ts| Value::String(format!("{}+00", format_timestamp(ts.naive_utc())))),

        (other, _) => Err(format!(
            "type {other} cannot be read from a parameterized query; cast the column to text"
        )
        .into()),
    };

    value.map_err(|e| decode_error(column, e))
}

fn decode<'r, T>(row: &'r PgRow, index: usize) -> std::result::Result<T, BoxDynError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(row.try_get::<T, _>(index)?)
}

fn decode_error(column: &ColumnInfo, error: BoxDynError) -> InvokeError {
    InvokeError::execution(format!(
        "Failed to read column \"{}\" ({}): {}",
        column.name, column.data_type, error
    ))
}

/// Renders a binary `numeric` the way PostgreSQL prints it.
///
/// The wire form is `ndigits, weight, sign, dscale` followed by base-10000
/// digits, all big-endian 16-bit words.
fn format_numeric(bytes: &[u8]) -> std::result::Result<String, BoxDynError> {
    let word = |i: usize| -> std::result::Result<i16, BoxDynError> {
        bytes
            .get(2 * i..2 * i + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = word(0)?.max(0) as usize;
    let weight = i32::from(word(1)?);
    let sign = word(2)? as u16;
    let dscale = word(3)?.max(0) as usize;
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let digit = |d: i32| usize::try_from(d).ok().and_then(|d| digits.get(d)).copied().unwrap_or(0);

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for d in 1..=weight {
            out.push_str(&format!("{:04}", digit(d)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut d = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(d)));
            d += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

/// `HH:MM:SS[.ffffff]` with trailing zeros trimmed, as PostgreSQL prints it.
fn format_time(time: NaiveTime) -> String {
    format!("{}{}", time.format("%H:%M:%S"), fraction(time.nanosecond()))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    format!("{}{}", ts.format("%Y-%m-%d %H:%M:%S"), fraction(ts.nanosecond()))
}

fn fraction(nanos: u32) -> String {
    let micros = nanos / 1_000;
    if micros == 0 {
        return String::new();
    }
    format!(".{micros:06}").trim_end_matches('0').to_string()
}

/// Keeps the driver's message and adds a hint for common connection failures.
fn format_connection_error(error: sqlx::Error) -> String {
    let message = error.to_string();
    let lower = message.to_lowercase();

    let hint = if lower.contains("connection refused") || lower.contains("could not connect") {
        Some("check that the server is running and the address is correct")
    } else if lower.contains("password authentication failed")
        || lower.contains("authentication failed")
    {
        Some("check the credential")
    } else if lower.contains("does not exist") && lower.contains("database") {
        Some("check the database name")
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        Some("set trust_server_certificate or disable encryption for servers without a trusted certificate")
    } else {
        None
    };

    match hint {
        Some(hint) => format!("{message} ({hint})"),
        None => message,
    }
}

/// Formats a query error, keeping the server message and adding detail and hint.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

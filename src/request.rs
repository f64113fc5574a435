//! Execution requests.
//!
//! An `ExecutionRequest` is the immutable input to a single query execution:
//! where to connect, what to run, how to shape the output. Callers normally
//! assemble one with [`ExecutionRequest::builder`], which resolves the loose
//! caller-facing options into tagged variants once.

use crate::config::{ConnectionProfile, Defaults};
use crate::db::Value;
use crate::error::{InvokeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Character that separates statements in a batch.
pub const STATEMENT_SEPARATOR: char = ';';

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 600;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// How the output of a query is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutionMode {
    /// Pick `MultipleResultSets` or `SingleResultSet` from the query text.
    #[default]
    Auto,
    /// Only the first result set, and only if it has rows.
    SingleResultSet,
    /// Every result set, in server order.
    MultipleResultSets,
    /// First column of the first row.
    Scalar,
    /// Executed for effect; no tables.
    NonQuery,
}

impl ExecutionMode {
    /// Returns the canonical name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::SingleResultSet => "single",
            Self::MultipleResultSets => "multiple",
            Self::Scalar => "scalar",
            Self::NonQuery => "nonquery",
        }
    }

    /// Resolves `Auto` against the query text; other modes are returned unchanged.
    ///
    /// This is a plain character search: a separator inside a string literal
    /// or a comment still selects `MultipleResultSets`.
    pub fn resolve(self, sql: &str) -> Self {
        match self {
            Self::Auto if sql.contains(STATEMENT_SEPARATOR) => Self::MultipleResultSets,
            Self::Auto => Self::SingleResultSet,
            other => other,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "single" | "singleresultset" | "datatable" => Ok(Self::SingleResultSet),
            "multiple" | "multipleresultsets" | "dataset" => Ok(Self::MultipleResultSets),
            "scalar" | "singlevalue" => Ok(Self::Scalar),
            "nonquery" => Ok(Self::NonQuery),
            other => Err(InvokeError::invalid_argument(format!(
                "Unknown execution mode '{other}'. Expected one of: auto, single, multiple, scalar, nonquery"
            ))),
        }
    }
}

impl TryFrom<String> for ExecutionMode {
    type Error = InvokeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExecutionMode> for String {
    fn from(mode: ExecutionMode) -> Self {
        mode.as_str().to_string()
    }
}

/// A secret value (password). Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret in clear text. Only the connection descriptor should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// How to authenticate against the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Auth {
    /// Use the calling process's own identity (driver defaults, environment, pgpass).
    #[default]
    Ambient,
    /// Explicit user name and secret.
    Explicit { user: String, secret: Secret },
}

/// Where the query text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Inline(String),
    File(PathBuf),
}

impl QuerySource {
    /// Returns the query text, reading it from disk for `File` sources.
    pub fn load(&self) -> Result<String> {
        match self {
            Self::Inline(sql) => {
                if sql.trim().is_empty() {
                    return Err(InvokeError::invalid_argument("Query text is empty"));
                }
                Ok(sql.clone())
            }
            Self::File(path) => load_query_file(path),
        }
    }
}

fn load_query_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(InvokeError::input_not_found(format!(
            "Query file '{}' does not exist",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        InvokeError::invalid_input(format!(
            "Could not read query file '{}': {e}",
            path.display()
        ))
    })?;

    if content.trim().is_empty() {
        return Err(InvokeError::invalid_input(format!(
            "Query file '{}' is empty",
            path.display()
        )));
    }

    debug!("Loaded {} bytes of query text from {}", content.len(), path.display());
    Ok(content)
}

/// Connection settings used when no explicit connection string is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    /// `host`, `host:port`, `host,port` or `[v6addr]:port`.
    pub address: String,
    pub database: String,
    pub auth: Auth,
    /// Encrypt the transport. On unless explicitly disabled.
    pub encrypt: bool,
    /// Accept the server certificate without verifying it.
    pub trust_server_certificate: bool,
    pub application_name: Option<String>,
}

impl ServerTarget {
    pub fn new(address: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            database: database.into(),
            auth: Auth::Ambient,
            encrypt: true,
            trust_server_certificate: false,
            application_name: None,
        }
    }
}

/// The server to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Server(ServerTarget),
    /// Used verbatim; no other connection option is merged in.
    ConnectionString(String),
}

/// Immutable input bundle for a single execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub target: Target,
    pub source: QuerySource,
    pub mode: ExecutionMode,
    /// Zero means no limit.
    pub query_timeout: Duration,
    /// Zero means no limit.
    pub connect_timeout: Duration,
    /// Named parameters in binding order. Names are unique and carry no `@`.
    pub parameters: Vec<(String, Value)>,
    pub capture_messages: bool,
    /// Append a `ServerInstance` column to every row.
    pub append_server_instance: bool,
}

impl ExecutionRequest {
    /// Creates a request with default mode and timeouts.
    pub fn new(target: Target, source: QuerySource) -> Self {
        Self {
            target,
            source,
            mode: ExecutionMode::Auto,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            parameters: Vec::new(),
            capture_messages: false,
            append_server_instance: false,
        }
    }

    pub fn builder() -> ExecutionRequestBuilder {
        ExecutionRequestBuilder::default()
    }

    /// Checks the request without touching the filesystem or the network.
    ///
    /// Returns the parameters with normalized names.
    pub fn validate(&self) -> Result<Vec<(String, Value)>> {
        match &self.target {
            Target::Server(server) => {
                if server.address.trim().is_empty() {
                    return Err(InvokeError::invalid_argument("Server address is required"));
                }
                if server.database.trim().is_empty() {
                    return Err(InvokeError::invalid_argument("Database name is required"));
                }
                if let Auth::Explicit { user, .. } = &server.auth {
                    if user.trim().is_empty() {
                        return Err(InvokeError::invalid_argument(
                            "A credential needs a non-empty user name",
                        ));
                    }
                }
            }
            Target::ConnectionString(conn_str) => {
                if conn_str.trim().is_empty() {
                    return Err(InvokeError::invalid_argument("Connection string is empty"));
                }
            }
        }

        match &self.source {
            QuerySource::Inline(sql) if sql.trim().is_empty() => {
                return Err(InvokeError::invalid_argument(
                    "Either query text or an input file is required",
                ));
            }
            QuerySource::File(path) if path.as_os_str().is_empty() => {
                return Err(InvokeError::invalid_argument(
                    "Either query text or an input file is required",
                ));
            }
            _ => {}
        }

        normalize_parameters(&self.parameters)
    }

    /// Value of the `ServerInstance` column.
    pub fn server_instance(&self) -> Value {
        match &self.target {
            Target::Server(server) => Value::String(server.address.clone()),
            Target::ConnectionString(_) => Value::Null,
        }
    }
}

/// Strips a leading `@`, checks the name is an identifier, and rejects duplicates.
fn normalize_parameters(parameters: &[(String, Value)]) -> Result<Vec<(String, Value)>> {
    let mut normalized: Vec<(String, Value)> = Vec::with_capacity(parameters.len());

    for (raw_name, value) in parameters {
        let name = raw_name.trim().trim_start_matches('@');
        if !is_identifier(name) {
            return Err(InvokeError::invalid_argument(format!(
                "Invalid parameter name '{raw_name}'"
            )));
        }
        if normalized
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            return Err(InvokeError::invalid_argument(format!(
                "Duplicate parameter name '{name}'"
            )));
        }
        normalized.push((name.to_string(), value.clone()));
    }

    Ok(normalized)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Builder accepting the caller-facing options of a request.
///
/// Empty strings count as "not supplied". Later calls override earlier ones,
/// so a profile can be applied first and then refined.
#[derive(Debug, Default, Clone)]
pub struct ExecutionRequestBuilder {
    server: Option<String>,
    database: Option<String>,
    query: Option<String>,
    input_file: Option<PathBuf>,
    mode: Option<ExecutionMode>,
    mode_name: Option<String>,
    query_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    application_name: Option<String>,
    connection_string: Option<String>,
    credential: Option<(String, Secret)>,
    encrypt: Option<bool>,
    trust_server_certificate: Option<bool>,
    parameters: Vec<(String, Value)>,
    capture_messages: bool,
    append_server_instance: bool,
}

impl ExecutionRequestBuilder {
    pub fn server(mut self, address: impl Into<String>) -> Self {
        self.server = non_empty(address.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = non_empty(database.into());
        self
    }

    pub fn query(mut self, sql: impl Into<String>) -> Self {
        self.query = Some(sql.into()).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into()).filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self.mode_name = None;
        self
    }

    /// Sets the mode by name; unknown names fail at `build()`.
    pub fn mode_name(mut self, name: impl Into<String>) -> Self {
        self.mode_name = Some(name.into());
        self.mode = None;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = non_empty(name.into());
        self
    }

    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection_string = non_empty(conn_str.into());
        self
    }

    pub fn credential(mut self, user: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credential = Some((user.into(), Secret::new(secret)));
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = Some(trust);
        self
    }

    /// Adds a named parameter. A `Value::Null` binds as SQL NULL.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn capture_messages(mut self, capture: bool) -> Self {
        self.capture_messages = capture;
        self
    }

    pub fn append_server_instance(mut self, append: bool) -> Self {
        self.append_server_instance = append;
        self
    }

    /// Applies the `[defaults]` block of a config file.
    pub fn defaults(mut self, defaults: &Defaults) -> Self {
        self.query_timeout = Some(Duration::from_secs(defaults.query_timeout_secs));
        self.connect_timeout = Some(Duration::from_secs(defaults.connect_timeout_secs));
        if let Some(name) = &defaults.application_name {
            self.application_name = non_empty(name.clone());
        }
        if let Some(mode) = defaults.mode {
            self = self.mode(mode);
        }
        self.capture_messages = defaults.capture_messages;
        self
    }

    /// Applies a named connection profile.
    pub fn profile(mut self, profile: &ConnectionProfile) -> Self {
        if let Some(server) = &profile.server {
            self.server = non_empty(server.clone());
        }
        if let Some(database) = &profile.database {
            self.database = non_empty(database.clone());
        }
        if let Some(conn_str) = &profile.connection_string {
            self.connection_string = non_empty(conn_str.clone());
        }
        if let Some(user) = &profile.user {
            let secret = profile.password.clone().unwrap_or_else(|| Secret::new(""));
            self.credential = Some((user.clone(), secret));
        }
        if let Some(encrypt) = profile.encrypt {
            self.encrypt = Some(encrypt);
        }
        if let Some(trust) = profile.trust_server_certificate {
            self.trust_server_certificate = Some(trust);
        }
        if let Some(name) = &profile.application_name {
            self.application_name = non_empty(name.clone());
        }
        self
    }

    /// Resolves the options into a validated request.
    pub fn build(self) -> Result<ExecutionRequest> {
        let source = match (self.query, self.input_file) {
            (Some(sql), None) => QuerySource::Inline(sql),
            (None, Some(path)) => QuerySource::File(path),
            (Some(_), Some(_)) => {
                return Err(InvokeError::invalid_argument(
                    "Query text and input file are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(InvokeError::invalid_argument(
                    "Either query text or an input file is required",
                ));
            }
        };

        let mode = match self.mode_name {
            Some(name) => name.parse()?,
            None => self.mode.unwrap_or_default(),
        };

        let target = match self.connection_string {
            Some(conn_str) => {
                if self.server.is_some() || self.database.is_some() || self.credential.is_some() {
                    debug!(
                        "Explicit connection string given; \
                         ignoring server, database and credential"
                    );
                }
                Target::ConnectionString(conn_str)
            }
            None => Target::Server(ServerTarget {
                address: self.server.unwrap_or_default(),
                database: self.database.unwrap_or_default(),
                auth: match self.credential {
                    Some((user, secret)) => Auth::Explicit { user, secret },
                    None => Auth::Ambient,
                },
                encrypt: self.encrypt.unwrap_or(true),
                trust_server_certificate: self.trust_server_certificate.unwrap_or(false),
                application_name: self.application_name,
            }),
        };

        let mut request = ExecutionRequest::new(target, source);
        request.mode = mode;
        if let Some(timeout) = self.query_timeout {
            request.query_timeout = timeout;
        }
        if let Some(timeout) = self.connect_timeout {
            request.connect_timeout = timeout;
        }
        request.capture_messages = self.capture_messages;
        request.append_server_instance = self.append_server_instance;
        request.parameters = self.parameters;
        request.parameters = request.validate()?;

        Ok(request)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

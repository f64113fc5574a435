//! Connection descriptor construction.
//!
//! Turns a [`Target`] into the `postgres://` URL handed to the driver, and a
//! redacted rendering of it for logs.

use crate::error::{InvokeError, Result};
use crate::request::{Auth, ServerTarget, Target};
use std::fmt;
use url::Url;

/// Placeholder shown instead of the password.
const REDACTED: &str = "***";

/// A connection string plus its display-safe rendering.
///
/// `Debug` and `Display` only ever show the redacted form.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    value: String,
    redacted: String,
}

impl ConnectionDescriptor {
    /// Builds the descriptor for a target.
    ///
    /// Explicit connection strings are passed through verbatim.
    pub fn for_target(target: &Target) -> Result<Self> {
        match target {
            Target::ConnectionString(conn_str) => Ok(Self {
                value: conn_str.clone(),
                redacted: redact_connection_string(conn_str),
            }),
            Target::Server(server) => Self::from_server(server),
        }
    }

    fn from_server(server: &ServerTarget) -> Result<Self> {
        let (host, port) = split_address(&server.address)?;

        let mut url = Url::parse(&format!("postgres://{host}")).map_err(|e| {
            InvokeError::invalid_argument(format!(
                "Invalid server address '{}': {e}",
                server.address
            ))
        })?;

        if let Some(port) = port {
            url.set_port(Some(port)).map_err(|_| {
                InvokeError::invalid_argument(format!("Invalid port in '{}'", server.address))
            })?;
        }

        url.path_segments_mut()
            .map_err(|_| InvokeError::invalid_argument("Server address cannot carry a path"))?
            .push(server.database.trim());

        if let Auth::Explicit { user, secret } = &server.auth {
            url.set_username(user)
                .and_then(|_| url.set_password(Some(secret.expose())))
                .map_err(|_| {
                    InvokeError::invalid_argument("Server address does not accept credentials")
                })?;
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sslmode", ssl_mode(server));
            if let Some(name) = &server.application_name {
                query.append_pair("application_name", name);
            }
        }

        let redacted = redact_url(&url);
        Ok(Self {
            value: url.into(),
            redacted,
        })
    }

    /// The full connection string, secret included. Hand this to the driver only.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The connection string with any password replaced.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionDescriptor")
            .field(&self.redacted)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

/// Maps the encryption flags onto a libpq `sslmode`.
fn ssl_mode(server: &ServerTarget) -> &'static str {
    match (server.encrypt, server.trust_server_certificate) {
        (false, _) => "disable",
        (true, true) => "require",
        (true, false) => "verify-full",
    }
}

/// Splits `host`, `host:port`, `host,port` and `[v6]:port` forms.
fn split_address(address: &str) -> Result<(String, Option<u16>)> {
    let address = address.trim();

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (v6, tail) = rest.split_once(']').ok_or_else(|| {
            InvokeError::invalid_argument(format!("Unterminated IPv6 address '{address}'"))
        })?;
        let port = tail.strip_prefix(':').or_else(|| tail.strip_prefix(','));
        if port.is_none() && !tail.is_empty() {
            return Err(InvokeError::invalid_argument(format!(
                "Unexpected text after IPv6 address in '{address}'"
            )));
        }
        (format!("[{v6}]"), port)
    } else if let Some((host, port)) = address.rsplit_once(',') {
        (host.to_string(), Some(port))
    } else if address.matches(':').count() == 1 {
        let (host, port) = address.split_once(':').unwrap_or((address, ""));
        (host.to_string(), Some(port))
    } else if address.contains(':') {
        (format!("[{address}]"), None)
    } else {
        (address.to_string(), None)
    };

    if host.is_empty() || host == "[]" {
        return Err(InvokeError::invalid_argument(format!(
            "Missing host in server address '{address}'"
        )));
    }

    let port = port
        .map(|p| {
            p.trim().parse::<u16>().map_err(|_| {
                InvokeError::invalid_argument(format!("Invalid port '{p}' in '{address}'"))
            })
        })
        .transpose()?;

    Ok((host, port))
}

fn redact_url(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    // A URL that already has a password always accepts a replacement.
    let _ = redacted.set_password(Some(REDACTED));
    redacted.to_string()
}

fn redact_connection_string(conn_str: &str) -> String {
    match Url::parse(conn_str) {
        Ok(url) => redact_url(&url),
        Err(_) => "<connection string>".to_string(),
    }
}

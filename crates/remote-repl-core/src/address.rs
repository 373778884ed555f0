//! Connection addresses shared by both sides of the bridge.

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;

/// Default host a server publishes on and a client connects to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9876;

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix:";
const SECRET_PARAM: &str = "?secret=";

/// Address parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Unknown address scheme: {0}")]
    UnknownScheme(String),
    #[error("Missing port in address: {0}")]
    MissingPort(String),
    #[error("Invalid port in address: {0}")]
    InvalidPort(String),
    #[error("Empty host in address: {0}")]
    EmptyHost(String),
    #[error("Empty socket path in address")]
    EmptyPath,
}

/// How two processes reach each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP on `host:port`.
    Tcp { host: String, port: u16 },
    /// Unix domain socket at `path`.
    Unix { path: PathBuf },
}

/// Immutable endpoint description: transport plus an optional shared secret.
///
/// Renders as `tcp://host:port[?secret=S]` or `unix:path[?secret=S]`, and
/// parses the same forms back (`unix://path` is accepted as well).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionAddress {
    transport: Transport,
    secret: Option<String>,
}

impl ConnectionAddress {
    /// TCP address without a secret.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: Transport::Tcp {
                host: host.into(),
                port,
            },
            secret: None,
        }
    }

    /// Unix socket address without a secret.
    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            transport: Transport::Unix { path: path.into() },
            secret: None,
        }
    }

    /// Attach a shared secret. Empty secrets are treated as absent.
    #[must_use]
    pub fn with_secret<S: Into<String>>(mut self, secret: Option<S>) -> Self {
        self.secret = secret.map(Into::into).filter(|s| !s.is_empty());
        self
    }

    /// Same address with a different TCP port. Unix addresses are returned unchanged.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        let mut next = self.clone();
        if let Transport::Tcp { port: p, .. } = &mut next.transport {
            *p = port;
        }
        next
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    #[must_use]
    pub const fn is_unix(&self) -> bool {
        matches!(self.transport, Transport::Unix { .. })
    }

    /// `host:port` form suitable for socket APIs, or `None` for Unix addresses.
    #[must_use]
    pub fn socket_addr(&self) -> Option<String> {
        match &self.transport {
            Transport::Tcp { host, port } if host.contains(':') => Some(format!("[{host}]:{port}")),
            Transport::Tcp { host, port } => Some(format!("{host}:{port}")),
            Transport::Unix { .. } => None,
        }
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            Transport::Tcp { .. } => {
                // socket_addr is always Some for TCP
                write!(f, "{TCP_SCHEME}{}", self.socket_addr().unwrap_or_default())?;
            }
            Transport::Unix { path } => write!(f, "{UNIX_SCHEME}{}", path.display())?,
        }
        if let Some(secret) = &self.secret {
            write!(f, "{SECRET_PARAM}{secret}")?;
        }
        Ok(())
    }
}

impl FromStr for ConnectionAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (location, secret) = match s.rsplit_once(SECRET_PARAM) {
            Some((location, secret)) => (location, Some(secret)),
            None => (s, None),
        };

        let address = if let Some(rest) = location.strip_prefix(TCP_SCHEME) {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(AddressError::EmptyHost(s.to_string()));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
            Self::tcp(host, port)
        } else if let Some(rest) = location.strip_prefix(UNIX_SCHEME) {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(AddressError::EmptyPath);
            }
            Self::unix(path)
        } else {
            return Err(AddressError::UnknownScheme(s.to_string()));
        };

        Ok(address.with_secret(secret))
    }
}

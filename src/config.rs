//! Client and server configuration.
//!
//! The client reads the server location from the environment (`IP_TUPLAS`, `PORT_TUPLAS`),
//! the server is configured by its command line. Both end up as plain values handed to the
//! constructors of [`TupleClient`](crate::TupleClient) and [`TupleServer`](crate::TupleServer).
use std::env;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::connection::RetryPolicy;
use crate::{Result, TupleError};

/// environment variable holding the server host
pub const ENV_HOST: &str = "IP_TUPLAS";
/// environment variable holding the server port
pub const ENV_PORT: &str = "PORT_TUPLAS";
/// optional environment variable overriding the connect retry budget
pub const ENV_MAX_RETRIES: &str = "TUPLAS_MAX_RETRIES";

/// the port the server listens on when none is given
pub const DEFAULT_PORT: u16 = 4000;

/// host and port of a tuple server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddress {
    /// creates an address from a host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerAddress {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        ServerAddress::new(addr.ip().to_string(), addr.port())
    }
}

/// Everything the client needs to reach a server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// where the server listens
    pub server: ServerAddress,
    /// backoff policy for connection attempts
    pub retry: RetryPolicy,
    /// read/write timeout applied to a connected socket, `None` blocks forever
    pub io_timeout: Option<Duration>,
}

impl ClientConfig {
    /// a configuration for `server` with the default retry policy and no I/O timeout
    pub fn new(server: ServerAddress) -> Self {
        ClientConfig {
            server,
            retry: RetryPolicy::default(),
            io_timeout: None,
        }
    }

    /// replaces the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// sets the socket read/write timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// reads the configuration from the process environment
    ///
    /// # Errors
    /// returns [`TupleError::Config`] if `IP_TUPLAS` or `PORT_TUPLAS` is missing, or if a
    /// variable does not parse
    pub fn from_env() -> Result<Self> {
        ClientConfig::from_lookup(|name| env::var(name).ok())
    }

    /// reads the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(ENV_HOST)
            .ok_or_else(|| TupleError::Config(format!("{} is not set", ENV_HOST)))?;
        let port = lookup(ENV_PORT)
            .ok_or_else(|| TupleError::Config(format!("{} is not set", ENV_PORT)))?;
        let port: u16 = port.trim().parse().map_err(|_| {
            TupleError::Config(format!("{}={} is not a valid port", ENV_PORT, port))
        })?;

        let mut config = ClientConfig::new(ServerAddress::new(host.trim(), port));
        if let Some(retries) = lookup(ENV_MAX_RETRIES) {
            config.retry.max_retries = retries.trim().parse().map_err(|_| {
                TupleError::Config(format!(
                    "{}={} is not a valid retry count",
                    ENV_MAX_RETRIES, retries
                ))
            })?;
        }
        Ok(config)
    }
}

/// How the server coordinates storage operations of concurrently running workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordination {
    /// the accept loop waits for each worker's storage operation before accepting the next
    /// connection, so storage operations run one at a time in acceptance order
    SingleFlight,
    /// connections are accepted without waiting; operations on the same key are serialized
    /// by a per-key lock and INIT excludes everything else
    PerKey,
}

impl Default for Coordination {
    fn default() -> Self {
        Coordination::SingleFlight
    }
}

impl fmt::Display for Coordination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordination::SingleFlight => f.write_str("single-flight"),
            Coordination::PerKey => f.write_str("per-key"),
        }
    }
}

impl FromStr for Coordination {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single-flight" => Ok(Coordination::SingleFlight),
            "per-key" => Ok(Coordination::PerKey),
            other => Err(TupleError::Config(format!(
                "unknown coordination mode '{}', expected 'single-flight' or 'per-key'",
                other
            ))),
        }
    }
}

/// Configuration of a [`TupleServer`](crate::TupleServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// address to listen on
    pub addr: SocketAddr,
    /// storage coordination strategy
    pub coordination: Coordination,
    /// how long a worker waits for a client's request line
    pub read_timeout: Option<Duration>,
    /// how long a worker may block writing a response
    pub write_timeout: Option<Duration>,
}

impl ServerConfig {
    /// a configuration listening on `addr`
    pub fn new(addr: SocketAddr) -> Self {
        ServerConfig {
            addr,
            ..ServerConfig::default()
        }
    }

    /// a configuration listening on `port` on all interfaces
    pub fn with_port(port: u16) -> Self {
        ServerConfig::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// replaces the coordination strategy
    pub fn coordination(mut self, coordination: Coordination) -> Self {
        self.coordination = coordination;
        self
    }

    /// sets the per-connection read timeout
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            coordination: Coordination::default(),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

//! Client side connection handling: every call opens its own TCP connection, sends one
//! request line, reads one response line and closes the connection again.
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::codec::{self, MAX_RESPONSE_LEN};
use crate::command::{Op, Request, Response};
use crate::config::{ClientConfig, ServerAddress};
use crate::{Result, TupleError};

/// Bounded exponential backoff for connection attempts.
///
/// After the n-th failed attempt (counting from zero) the client sleeps `base_delay * 2^n`
/// before trying again. Once `max_retries` retries have failed the connect gives up with
/// [`TupleError::ServerUnavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// how many times a refused connect is retried
    pub max_retries: u32,
    /// the sleep before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// creates a policy
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
        }
    }

    /// a policy that never retries
    pub fn no_retry() -> Self {
        RetryPolicy::new(0, Duration::ZERO)
    }

    /// the sleep that follows failed attempt number `retry` (zero based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX)
    }

    /// calls `attempt` until it succeeds, sleeping through `sleep` between attempts.
    ///
    /// Only transient errors (connection refused, a full backlog) are retried; any other
    /// error is returned immediately as [`TupleError::Communication`].
    ///
    /// # Errors
    /// returns [`TupleError::ServerUnavailable`] once the retry budget is exhausted
    pub fn connect<T, C, S>(&self, target: &str, mut attempt: C, mut sleep: S) -> Result<T>
    where
        C: FnMut() -> io::Result<T>,
        S: FnMut(Duration),
    {
        let mut retries = 0;
        loop {
            match attempt() {
                Ok(conn) => return Ok(conn),
                Err(e) if is_transient(&e) => {
                    if retries >= self.max_retries {
                        warn!("giving up on {} after {} attempts", target, retries + 1);
                        return Err(TupleError::ServerUnavailable {
                            addr: target.to_string(),
                            attempts: retries + 1,
                        });
                    }
                    let delay = self.delay(retries);
                    warn!(
                        "connecting to {} failed ({}), retrying in {:?}",
                        target, e, delay
                    );
                    sleep(delay);
                    retries += 1;
                }
                Err(e) => return Err(TupleError::Communication(e)),
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::WouldBlock)
}

/// resolves `server` to a socket address. `localhost` always maps to `127.0.0.1`, other
/// names go through the system resolver, preferring IPv4 results.
pub fn resolve(server: &ServerAddress) -> Result<SocketAddr> {
    if server.host == "localhost" {
        return Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, server.port)));
    }
    let addrs: Vec<SocketAddr> = (server.host.as_str(), server.port)
        .to_socket_addrs()
        .map_err(TupleError::Communication)?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            TupleError::Communication(io::Error::new(
                ErrorKind::NotFound,
                format!("{} did not resolve to any address", server),
            ))
        })
}

/// One TCP session, used for exactly one request/response exchange.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    /// resolves `server` and connects to it, retrying according to `retry`
    pub fn open(
        server: &ServerAddress,
        retry: &RetryPolicy,
        io_timeout: Option<Duration>,
    ) -> Result<Connection> {
        let peer = resolve(server)?;
        let stream = retry.connect(&server.to_string(), || TcpStream::connect(peer), thread::sleep)?;
        stream
            .set_read_timeout(io_timeout)
            .and_then(|_| stream.set_write_timeout(io_timeout))
            .map_err(TupleError::Communication)?;
        let writer = stream.try_clone().map_err(TupleError::Communication)?;
        debug!("connected to {}", peer);

        Ok(Connection {
            reader: BufReader::new(stream),
            writer: BufWriter::new(writer),
            peer,
        })
    }

    /// the address this connection is talking to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// encodes and sends `request`
    pub fn send(&mut self, request: &Request) -> Result<()> {
        let line = codec::encode_request(request)?;
        codec::write_frame(&mut self.writer, &line).map_err(TupleError::Communication)?;
        debug!("sent {:?} to {}", line, self.peer);
        Ok(())
    }

    /// blocks until one complete response line has been read, then decodes it as the
    /// response to an `op` request
    pub fn receive(&mut self, op: Op) -> Result<Response> {
        match codec::read_frame(&mut self.reader, MAX_RESPONSE_LEN) {
            Ok(Some(line)) => {
                debug!("received {:?} from {}", line, self.peer);
                codec::decode_response(&line, op)
            }
            Ok(None) => Err(TupleError::Communication(io::Error::new(
                ErrorKind::UnexpectedEof,
                "the server closed the connection without answering",
            ))),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                Err(TupleError::MalformedResponse(e.to_string()))
            }
            Err(e) => Err(TupleError::Communication(e)),
        }
    }

    /// shuts the connection down
    pub fn close(self) {
        if let Err(e) = self.writer.get_ref().shutdown(Shutdown::Both) {
            // the server may already have closed its end
            if e.kind() != ErrorKind::NotConnected {
                debug!("error closing connection to {}: {}", self.peer, e);
            }
        }
    }
}

/// performs a single request/response exchange with the server described by `config`.
///
/// The request is validated before any network activity takes place.
#[instrument(skip(config, request), fields(server = %config.server, op = %request.op()))]
pub fn perform(config: &ClientConfig, request: &Request) -> Result<Response> {
    request.validate()?;
    let mut conn = Connection::open(&config.server, &config.retry, config.io_timeout)?;
    conn.send(request)?;
    let response = conn.receive(request.op())?;
    conn.close();
    Ok(response)
}

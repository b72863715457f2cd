use std::io::{self, BufReader, BufWriter, ErrorKind, Read};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::codec::{self, MAX_REQUEST_LEN};
use crate::command::{Op, Request, Response, STATUS_OK, STATUS_PRESENT};
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, Ticket};
use crate::engine::TupleEngine;
use crate::thread_pool::ThreadPool;
use crate::Result;

// how much of an unreadable request is discarded before the connection is closed
const DRAIN_LIMIT: u64 = 64 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A TCP server in front of a [`TupleEngine`].
///
/// Every accepted connection is handed to a worker from the [`ThreadPool`]; the worker reads
/// one request line, runs the storage operation, writes one response line and closes the
/// connection. How storage operations of different workers are coordinated is decided by
/// the [`Coordination`](crate::Coordination) mode of the [`ServerConfig`].
///
/// # Example
/// ```rust,no_run
/// use tuplestore::{MemStore, ServerConfig, TupleServer};
/// use tuplestore::thread_pool::{NaiveThreadPool, ThreadPool};
/// # fn main() -> tuplestore::Result<()> {
/// let config = ServerConfig::with_port(4000);
/// let server = TupleServer::bind(config, MemStore::new(), NaiveThreadPool::new(0)?)?;
/// let shutdown = server.shutdown_handle();
/// // hand `shutdown` to whoever decides when the server stops, then
/// server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct TupleServer<E: TupleEngine, P: ThreadPool> {
    engine: E,
    pool: P,
    listener: TcpListener,
    config: ServerConfig,
    coordinator: Coordinator,
    shutdown: ShutdownHandle,
}

impl<E: TupleEngine, P: ThreadPool> TupleServer<E, P> {
    /// binds the listening socket described by `config`. Address reuse is enabled on the
    /// socket, so a restarted server can bind a port left in TIME_WAIT.
    pub fn bind(config: ServerConfig, engine: E, pool: P) -> Result<Self> {
        let listener = TcpListener::bind(config.addr)?;
        let local_addr = listener.local_addr()?;
        info!(
            "listening on {} ({} coordination)",
            local_addr, config.coordination
        );

        Ok(TupleServer {
            engine,
            pool,
            listener,
            coordinator: Coordinator::new(config.coordination),
            shutdown: ShutdownHandle::new(local_addr),
            config,
        })
    }

    /// the address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// a handle that stops [`TupleServer::run`]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// runs the accept loop until the shutdown handle is triggered. The listening socket is
    /// closed when this returns.
    pub fn run(self) -> Result<()> {
        for stream in self.listener.incoming() {
            if self.shutdown.is_triggered() {
                info!("shutdown requested, closing the listener");
                break;
            }
            match stream {
                Ok(stream) => {
                    let engine = self.engine.clone();
                    let ticket = self.coordinator.ticket();
                    let timeouts = (self.config.read_timeout, self.config.write_timeout);
                    self.pool.spawn(move || {
                        if let Err(e) = serve(&engine, stream, ticket, timeouts) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                    self.coordinator.await_handoff();
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Stops a running [`TupleServer`].
///
/// Triggering sets a flag checked by the accept loop and opens a throw-away connection to the
/// listener so that a blocked `accept` returns and sees it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggered: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    fn new(local_addr: SocketAddr) -> Self {
        // a wildcard listener is reachable through the loopback interface
        let ip = match local_addr {
            SocketAddr::V4(addr) if addr.ip().is_unspecified() => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(addr) if addr.ip().is_unspecified() => Ipv6Addr::LOCALHOST.into(),
            addr => addr.ip(),
        };
        ShutdownHandle {
            triggered: Arc::new(AtomicBool::new(false)),
            wake_addr: SocketAddr::new(ip, local_addr.port()),
        }
    }

    /// asks the server to stop accepting connections
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            // the loop still stops on its next accepted connection
            warn!("could not wake the accept loop: {}", e);
        }
    }

    /// true once [`ShutdownHandle::trigger`] was called
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// the states a connection moves through while being served
#[derive(Debug)]
enum Stage {
    AwaitingLine,
    Parsed(String),
    Dispatched(Request),
    Responded(Op, Response),
    Draining,
    Closed,
}

/// Serves the single request that arrives on `tcp`: read one line, decode it, run the
/// storage operation through `ticket`, and send the response.
///
/// A failed or empty read closes the connection without a response. A request that can not
/// be decoded is answered with `-1` without touching the engine. If the request line itself
/// was unreadable, the rest of it is discarded after the response so that closing the socket
/// does not reset the connection before the client has read the answer.
fn serve<E: TupleEngine>(
    engine: &E,
    tcp: TcpStream,
    mut ticket: Ticket,
    (read_timeout, write_timeout): (Option<Duration>, Option<Duration>),
) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    tcp.set_read_timeout(read_timeout)?;
    tcp.set_write_timeout(write_timeout)?;
    let mut reader = BufReader::new(&tcp);
    let mut writer = BufWriter::new(&tcp);

    let mut unread_input = false;
    let mut stage = Stage::AwaitingLine;
    loop {
        stage = match stage {
            Stage::AwaitingLine => match codec::read_frame(&mut reader, MAX_REQUEST_LEN) {
                Ok(Some(line)) => Stage::Parsed(line),
                Ok(None) => {
                    debug!("{} closed the connection without a request", peer_addr);
                    Stage::Closed
                }
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    warn!("unreadable request from {}: {}", peer_addr, e);
                    ticket.release();
                    unread_input = true;
                    Stage::Responded(Op::Init, Response::error())
                }
                Err(e) => {
                    warn!("failed to read request from {}: {}", peer_addr, e);
                    Stage::Closed
                }
            },
            Stage::Parsed(line) => match codec::decode_request(&line) {
                Ok(request) => {
                    debug!("Receive request from {}: {:?}", peer_addr, request);
                    Stage::Dispatched(request)
                }
                Err(e) => {
                    warn!("rejecting request {:?} from {}: {}", line, peer_addr, e);
                    ticket.release();
                    Stage::Responded(Op::Init, Response::error())
                }
            },
            Stage::Dispatched(request) => {
                let op = request.op();
                let key = request.key();
                let response = ticket.run(key, || dispatch(engine, request));
                Stage::Responded(op, response)
            }
            Stage::Responded(op, response) => {
                let line = codec::encode_response(op, &response);
                match codec::write_frame(&mut writer, &line) {
                    Ok(()) => debug!("Response sent to {}: {:?}", peer_addr, line),
                    Err(e) => error!("failed to send response to {}: {}", peer_addr, e),
                }
                if unread_input {
                    Stage::Draining
                } else {
                    Stage::Closed
                }
            }
            Stage::Draining => {
                let mut rest = (&mut reader).take(DRAIN_LIMIT);
                let drained = tcp
                    .shutdown(Shutdown::Write)
                    .and_then(|_| tcp.set_read_timeout(Some(DRAIN_TIMEOUT)))
                    .and_then(|_| io::copy(&mut rest, &mut io::sink()));
                match drained {
                    Ok(bytes) => debug!("discarded {} bytes from {}", bytes, peer_addr),
                    Err(e) => debug!("stopped discarding input from {}: {}", peer_addr, e),
                }
                Stage::Closed
            }
            Stage::Closed => break,
        };
    }
    Ok(())
}

/// routes `request` to the matching engine operation and turns the outcome into a response
fn dispatch<E: TupleEngine>(engine: &E, request: Request) -> Response {
    let outcome = match request {
        Request::Init => engine.init().map(|_| Response::status(STATUS_OK)),
        Request::Set { key, tuple } => engine.set(key, tuple).map(|_| Response::status(STATUS_OK)),
        Request::Get { key } => engine.get(key).map(|found| match found {
            Some(tuple) => Response::found(tuple),
            None => Response::error(),
        }),
        Request::Modify { key, tuple } => engine
            .modify(key, tuple)
            .map(|_| Response::status(STATUS_OK)),
        Request::Delete { key } => engine.delete(key).map(|_| Response::status(STATUS_OK)),
        Request::Exist { key } => engine.exist(key).map(|present| {
            Response::status(if present { STATUS_PRESENT } else { STATUS_OK })
        }),
    };
    outcome.unwrap_or_else(|e| {
        debug!("storage operation failed: {}", e);
        Response::error()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Tuple;
    use crate::engine::MemStore;

    #[test]
    fn dispatch_maps_engine_outcomes_to_result_codes() {
        let engine = MemStore::new();
        let tuple = Tuple::new("value1_7", vec![1.5, 2.5]).unwrap();

        assert_eq!(dispatch(&engine, Request::Exist { key: 7 }).result, 0);
        assert_eq!(dispatch(&engine, Request::Get { key: 7 }), Response::error());
        let set = Request::Set {
            key: 7,
            tuple: tuple.clone(),
        };
        assert_eq!(dispatch(&engine, set.clone()).result, 0);
        assert_eq!(dispatch(&engine, set).result, -1);
        assert_eq!(dispatch(&engine, Request::Exist { key: 7 }).result, 1);
        assert_eq!(
            dispatch(&engine, Request::Get { key: 7 }),
            Response::found(tuple)
        );
        assert_eq!(dispatch(&engine, Request::Delete { key: 7 }).result, 0);
        assert_eq!(dispatch(&engine, Request::Delete { key: 7 }).result, -1);
        assert_eq!(dispatch(&engine, Request::Init).result, 0);
    }

    #[test]
    fn shutdown_handle_targets_loopback_for_wildcard_listeners() {
        let handle = ShutdownHandle::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4000)));
        assert_eq!(
            handle.wake_addr,
            SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))
        );
        assert!(!handle.is_triggered());
    }
}

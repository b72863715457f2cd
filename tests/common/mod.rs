#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tuplestore::{
    ClientConfig, Coordination, NaiveThreadPool, Result, RetryPolicy, ServerAddress, ServerConfig,
    ShutdownHandle, ThreadPool, TupleClient, TupleEngine, TupleServer,
};

/// a server running on its own thread for the duration of a test
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    pub fn start<E: TupleEngine>(engine: E, coordination: Coordination) -> TestServer {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .coordination(coordination)
            .read_timeout(Some(Duration::from_secs(2)));
        let server = TupleServer::bind(config, engine, NaiveThreadPool::new(0).unwrap()).unwrap();
        TestServer::spawn(server)
    }

    pub fn spawn<E: TupleEngine, P: ThreadPool>(server: TupleServer<E, P>) -> TestServer {
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = thread::spawn(move || server.run());
        TestServer {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn client(&self) -> TupleClient {
        client_for(self.addr.port())
    }

    /// triggers the shutdown handle and waits for the accept loop to return
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        match self.handle.take() {
            Some(handle) => handle.join().expect("server thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// a client talking to `localhost:port` with a short retry policy
pub fn client_for(port: u16) -> TupleClient {
    let config = ClientConfig::new(ServerAddress::new("localhost", port))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(20)))
        .with_io_timeout(Duration::from_secs(5));
    TupleClient::new(config)
}

/// a local port nothing is listening on
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

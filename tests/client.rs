use std::io::ErrorKind;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tuplestore::config::ENV_HOST;
use tuplestore::{
    ClientConfig, Coordination, MemStore, NaiveThreadPool, RetryPolicy, ServerAddress,
    ServerConfig, ThreadPool, TupleClient, TupleError, TupleServer,
};

mod common;
use common::{free_port, TestServer};

/// a client whose server listens but never accepts; a connection attempt would be visible
/// through `accept` on the returned listener
fn client_with_watched_listener() -> (TupleClient, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ClientConfig::new(ServerAddress::new("localhost", port))
        .with_retry(RetryPolicy::no_retry());
    (TupleClient::new(config), listener)
}

fn assert_no_connection(listener: &TcpListener) {
    match listener.accept() {
        Err(e) => assert_eq!(e.kind(), ErrorKind::WouldBlock),
        Ok((_, peer)) => panic!("unexpected connection from {}", peer),
    }
}

#[test]
fn invalid_arguments_are_rejected_before_connecting() {
    let (client, listener) = client_with_watched_listener();
    let too_long = "x".repeat(257);
    let too_many = vec![1.0; 33];

    let calls = vec![
        client.set_value(1, &too_long, &[1.0]),
        client.set_value(1, "ok", &[]),
        client.set_value(1, "ok", &too_many),
        client.modify_value(1, &too_long, &[1.0]),
        client.modify_value(1, "ok", &[]),
        client.modify_value(1, "ok", &too_many),
        client.set_value(1, "two words", &[1.0]),
    ];
    for result in calls {
        let err = result.unwrap_err();
        assert!(matches!(err, TupleError::InvalidArgument(_)), "{:?}", err);
        assert_eq!(err.status(), -1);
    }
    assert_no_connection(&listener);
}

#[test]
fn limits_are_inclusive() {
    let server = TestServer::start(MemStore::new(), Coordination::SingleFlight);
    let client = server.client();
    let value1 = "v".repeat(256);
    let value2: Vec<f64> = (0..32).map(f64::from).collect();

    assert_eq!(client.set_value(1, &value1, &value2).unwrap(), 0);
    let tuple = client.get_value(1).unwrap().unwrap();
    assert_eq!(tuple.value1, value1);
    assert_eq!(tuple.value2, value2);
}

#[test]
fn unreachable_server_is_a_communication_error() {
    let config = ClientConfig::new(ServerAddress::new("localhost", free_port()))
        .with_retry(RetryPolicy::new(2, Duration::from_millis(10)));
    let client = TupleClient::new(config);

    let started = Instant::now();
    let err = client.exist(1).unwrap_err();
    assert!(
        matches!(err, TupleError::ServerUnavailable { attempts: 3, .. }),
        "{:?}",
        err
    );
    assert_eq!(err.status(), -2);
    assert!(err.is_communication());
    // 10ms + 20ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(30));

    assert_eq!(client.get_value(1).unwrap_err().status(), -2);
    assert_eq!(client.init().unwrap_err().status(), -2);
}

#[test]
fn retries_until_a_late_server_comes_up() {
    let port = free_port();
    let starter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let config = ServerConfig::with_port(port);
        let server =
            TupleServer::bind(config, MemStore::new(), NaiveThreadPool::new(0).unwrap()).unwrap();
        TestServer::spawn(server)
    });

    let config = ClientConfig::new(ServerAddress::new("localhost", port))
        .with_retry(RetryPolicy::new(6, Duration::from_millis(20)));
    let client = TupleClient::new(config);
    assert_eq!(client.set_value(3, "late", &[3.0]).unwrap(), 0);

    let server = starter.join().unwrap();
    assert_eq!(server.client().exist(3).unwrap(), 1);
}

#[test]
fn server_answers_mirror_the_store() {
    let server = TestServer::start(MemStore::new(), Coordination::PerKey);
    let client = server.client();
    let mut rng = SmallRng::seed_from_u64(0x7u64);

    for key in 0..50 {
        let len = rng.gen_range(1..=32);
        let value2: Vec<f64> = (0..len).map(|_| rng.gen_range(-1e9..1e9)).collect();
        let value1 = format!("value1_{}", rng.gen::<u32>());
        assert_eq!(client.set_value(key, &value1, &value2).unwrap(), 0);

        let tuple = client.get_value(key).unwrap().unwrap();
        assert_eq!(tuple.value1, value1);
        assert_eq!(tuple.value2, value2);
    }
}

#[test]
fn from_env_requires_the_host_variable() {
    std::env::remove_var(ENV_HOST);
    let err = TupleClient::from_env().unwrap_err();
    assert!(matches!(err, TupleError::Config(_)), "{:?}", err);
}

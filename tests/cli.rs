use std::process::Command;

use assert_cmd::prelude::*;
use predicates::ord::eq;
use predicates::str::{contains, PredicateStrExt};
use tuplestore::{Coordination, MemStore};

mod common;
use common::{free_port, TestServer};

fn client_cmd(port: u16) -> Command {
    let mut cmd = Command::cargo_bin("tuple-client").unwrap();
    cmd.env("IP_TUPLAS", "localhost")
        .env("PORT_TUPLAS", port.to_string())
        .env("TUPLAS_MAX_RETRIES", "1");
    cmd
}

// `tuple-client` with no args should exit with a non-zero code.
#[test]
fn client_cli_no_args() {
    Command::cargo_bin("tuple-client").unwrap().assert().failure();
}

#[test]
fn client_cli_invalid_subcommand() {
    client_cmd(4000).args(&["unknown"]).assert().failure();
}

#[test]
fn client_cli_version() {
    Command::cargo_bin("tuple-client")
        .unwrap()
        .args(&["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_version() {
    Command::cargo_bin("tuple-server")
        .unwrap()
        .args(&["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_rejects_unknown_engine() {
    Command::cargo_bin("tuple-server")
        .unwrap()
        .args(&["--engine", "sled"])
        .assert()
        .failure();
}

#[test]
fn client_cli_full_session() {
    let server = TestServer::start(MemStore::new(), Coordination::SingleFlight);
    let port = server.addr.port();

    client_cmd(port)
        .args(&["set", "7", "value1_7", "1.5", "2.5"])
        .assert()
        .success()
        .stdout(eq("0").trim());
    client_cmd(port)
        .args(&["get", "7"])
        .assert()
        .success()
        .stdout(eq("value1_7 1.5 2.5").trim());
    client_cmd(port)
        .args(&["set", "7", "again", "1"])
        .assert()
        .success()
        .stdout(eq("-1").trim());
    client_cmd(port)
        .args(&["modify", "7", "v2", "-9.9"])
        .assert()
        .success()
        .stdout(eq("0").trim());
    client_cmd(port)
        .args(&["get", "7"])
        .assert()
        .success()
        .stdout(eq("v2 -9.9").trim());
    client_cmd(port)
        .args(&["exist", "7"])
        .assert()
        .success()
        .stdout(eq("1").trim());
    client_cmd(port)
        .args(&["delete", "7"])
        .assert()
        .success()
        .stdout(eq("0").trim());
    client_cmd(port)
        .args(&["get", "7"])
        .assert()
        .success()
        .stdout(eq("Key not found").trim());
    client_cmd(port)
        .args(&["init"])
        .assert()
        .success()
        .stdout(eq("0").trim());
}

#[test]
fn client_cli_negative_key() {
    let server = TestServer::start(MemStore::new(), Coordination::SingleFlight);
    let port = server.addr.port();

    client_cmd(port)
        .args(&["set", "-3", "minus", "3"])
        .assert()
        .success()
        .stdout(eq("0").trim());
    client_cmd(port)
        .args(&["exist", "-3"])
        .assert()
        .success()
        .stdout(eq("1").trim());
}

#[test]
fn client_cli_invalid_arguments() {
    // nothing is listening: arguments must be rejected before connecting
    let port = free_port();

    client_cmd(port)
        .args(&["get", "seven"])
        .assert()
        .code(1);
    client_cmd(port)
        .args(&["set", "1", "v", "one"])
        .assert()
        .code(1);
    let too_many: Vec<String> = (0..33).map(|i| i.to_string()).collect();
    client_cmd(port)
        .args(&["set", "1", "v"])
        .args(&too_many)
        .assert()
        .code(1);
    let too_long = "x".repeat(257);
    client_cmd(port)
        .args(&["set", "1", too_long.as_str(), "1"])
        .assert()
        .code(1);
}

#[test]
fn client_cli_unreachable_server() {
    client_cmd(free_port())
        .env("TUPLAS_MAX_RETRIES", "0")
        .args(&["exist", "1"])
        .assert()
        .code(2);
}

#[test]
fn client_cli_missing_environment() {
    Command::cargo_bin("tuple-client")
        .unwrap()
        .env_remove("IP_TUPLAS")
        .env("PORT_TUPLAS", "4000")
        .args(&["exist", "1"])
        .assert()
        .code(1);
}

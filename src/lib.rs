#![deny(missing_docs)]
//! A client/server tuple store. Tuples are keyed by an [`i32`] and hold a short string
//! (`value1`) and a vector of 1 to 32 doubles (`value2`).
//!
//! This crate provides the [`TupleClient`] library, the [`TupleServer`] that serves it over
//! TCP, and two storage engines behind the [`TupleEngine`] trait. A `tuple-client` and a
//! `tuple-server` executable wrap them for use from the command line.
//!
//! ## Supported Operations
//! - `INIT` destroys every stored tuple
//! - `SET_VALUE` stores a tuple under a new key
//! - `GET_VALUE` fetches the tuple stored under a key
//! - `MODIFY_VALUE` replaces the tuple stored under an existing key
//! - `DELETE_KEY` removes a key
//! - `EXIST` tests whether a key is present
//!
//! Every operation answers with an integer result: `0` for success and `-1` for failure
//! (`EXIST` answers `1` or `0`). A client that cannot reach the server reports `-2` through
//! [`TupleError::status`].
//!
//! ## Protocol
//! A client opens one TCP connection per call, sends a single line of space separated fields
//! terminated by a NUL byte, and reads a single line back; see [`codec`] for the exact layout
//! and the maximum line lengths. Connection attempts that are refused are retried with an
//! exponential backoff ([`RetryPolicy`]).
//!
//! ## Server
//! The server hands each accepted connection to a worker from a [`ThreadPool`]. By default
//! the accept loop waits until the worker's storage operation is done before accepting the
//! next connection, so storage operations run one at a time in acceptance order
//! ([`Coordination::SingleFlight`]). [`Coordination::PerKey`] lifts this and only serializes
//! operations on the same key.
//!
//! ## Engines
//! [`MemStore`] keeps tuples in a concurrent in-memory map. [`LogStore`] persists them into
//! "command log" files (`1.log`, `2.log`...) in a working directory, each command being a
//! JSON document, and compacts the logs once enough stale data has piled up.

pub use client::TupleClient;
pub use command::{Op, Request, Response, Tuple};
pub use config::{ClientConfig, Coordination, ServerAddress, ServerConfig};
pub use connection::{Connection, RetryPolicy};
pub use coordinator::{Coordinator, Ticket};
pub use engine::{LogStore, MemStore, TupleEngine};
pub use error::{Result, TupleError, STATUS_COMMUNICATION};
pub use server::{ShutdownHandle, TupleServer};
pub use thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};

mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
mod coordinator;
mod engine;
mod error;
mod server;
pub mod thread_pool;

use tracing::debug;

use crate::command::{Request, Response, Tuple, STATUS_OK};
use crate::config::ClientConfig;
use crate::connection;
use crate::Result;

/// `TupleClient` contains the functionality for communication with a
/// [`TupleServer`](crate::TupleServer).
///
/// Every call opens a fresh connection, performs one request/response exchange and closes
/// the connection again. Status returning calls yield the server's result code (`0` success,
/// `-1` failure, `1`/`0` for [`TupleClient::exist`]); failing to reach or talk to the server
/// is an `Err` whose [`status`](crate::TupleError::status) is `-2`.
///
/// Arguments are validated before any connection is opened.
#[derive(Debug, Clone)]
pub struct TupleClient {
    config: ClientConfig,
}

impl TupleClient {
    /// creates a client for the server described by `config`
    pub fn new(config: ClientConfig) -> Self {
        TupleClient { config }
    }

    /// creates a client from the `IP_TUPLAS` and `PORT_TUPLAS` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(TupleClient::new(ClientConfig::from_env()?))
    }

    /// the configuration this client uses
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// sends `request` and returns the raw response
    pub fn perform(&self, request: &Request) -> Result<Response> {
        connection::perform(&self.config, request)
    }

    /// destroys every tuple stored on the server
    pub fn init(&self) -> Result<i32> {
        self.status(Request::Init)
    }

    /// stores a new tuple under `key`. The server answers `-1` if the key already exists.
    ///
    /// # Errors
    /// returns [`TupleError::InvalidArgument`](crate::TupleError::InvalidArgument) if
    /// `value1` is longer than 256 bytes or `value2` does not hold between 1 and 32 doubles
    pub fn set_value(&self, key: i32, value1: &str, value2: &[f64]) -> Result<i32> {
        let tuple = Tuple::new(value1, value2.to_vec())?;
        self.status(Request::Set { key, tuple })
    }

    /// gets the tuple stored under `key`
    /// ## Returns
    /// `Ok(Some(tuple))` if the key was found, `Ok(None)` if the server answered `-1`
    pub fn get_value(&self, key: i32) -> Result<Option<Tuple>> {
        let response = self.perform(&Request::Get { key })?;
        match response.tuple {
            Some(tuple) if response.result == STATUS_OK => Ok(Some(tuple)),
            _ => {
                debug!(key, result = response.result, "no tuple returned");
                Ok(None)
            }
        }
    }

    /// replaces the tuple stored under `key`. The server answers `-1` if the key is absent.
    ///
    /// # Errors
    /// same argument validation as [`TupleClient::set_value`]
    pub fn modify_value(&self, key: i32, value1: &str, value2: &[f64]) -> Result<i32> {
        let tuple = Tuple::new(value1, value2.to_vec())?;
        self.status(Request::Modify { key, tuple })
    }

    /// deletes the tuple stored under `key`. The server answers `-1` if the key is absent.
    pub fn delete_key(&self, key: i32) -> Result<i32> {
        self.status(Request::Delete { key })
    }

    /// returns `1` if a tuple is stored under `key`, `0` if not
    pub fn exist(&self, key: i32) -> Result<i32> {
        self.status(Request::Exist { key })
    }

    fn status(&self, request: Request) -> Result<i32> {
        Ok(self.perform(&request)?.result)
    }
}

use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`TupleError`]
pub type Result<T> = std::result::Result<T, TupleError>;

/// status code a client reports when the server could not be reached or talked to
pub const STATUS_COMMUNICATION: i32 = -2;

/// The Error variants used throughout the tuple store.
///
/// Protocol errors (`MalformedRequest`, `MalformedResponse`), client side validation errors
/// (`InvalidArgument`) and transport errors (`Communication`, `ServerUnavailable`) are kept
/// apart so that callers can decide whether retrying a call makes sense.
#[derive(Debug, Error)]
pub enum TupleError {
    /// a request line could not be decoded
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// a response line could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// an argument was rejected before anything was sent over the network
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// an I/O error occurred while connecting to, writing to or reading from the server
    #[error("communication error: {0}")]
    Communication(#[source] io::Error),

    /// the connect retry budget was exhausted
    #[error("server at {addr} is unavailable after {attempts} connection attempts")]
    ServerUnavailable {
        /// the address that was dialed
        addr: String,
        /// how many connects were attempted in total
        attempts: u32,
    },

    /// the key is not present in the store
    #[error("key {0} not found")]
    KeyNotFound(i32),

    /// the key is already present in the store
    #[error("key {0} already exists")]
    KeyExists(i32),

    /// configuration could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// variant for errors caused by file or socket IO
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// serde_json (de)serialization error from the command log
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// catch-all with a description of the failure
    #[error("{0}")]
    StringErr(String),
}

impl TupleError {
    /// maps this error onto the status code convention of the tuple service:
    /// `-2` when the server could not be talked to at all, `-1` for everything else
    pub fn status(&self) -> i32 {
        match self {
            TupleError::Communication(_) | TupleError::ServerUnavailable { .. } => {
                STATUS_COMMUNICATION
            }
            _ => -1,
        }
    }

    /// true if the failure happened before or while talking to the server, as opposed to
    /// the server answering with a logical failure
    pub fn is_communication(&self) -> bool {
        self.status() == STATUS_COMMUNICATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communication_failures_map_to_minus_two() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(TupleError::Communication(refused).status(), -2);

        let unavailable = TupleError::ServerUnavailable {
            addr: "127.0.0.1:4000".into(),
            attempts: 3,
        };
        assert_eq!(unavailable.status(), -2);
        assert!(unavailable.is_communication());
    }

    #[test]
    fn logical_failures_map_to_minus_one() {
        assert_eq!(TupleError::InvalidArgument("n".into()).status(), -1);
        assert_eq!(TupleError::MalformedResponse("x".into()).status(), -1);
        assert_eq!(TupleError::KeyNotFound(3).status(), -1);
        assert!(!TupleError::KeyExists(3).is_communication());
    }
}

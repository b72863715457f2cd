//! The requests and responses exchanged between a [`TupleClient`](crate::TupleClient) and a
//! [`TupleServer`](crate::TupleServer), and the [`Tuple`] they carry.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, TupleError};

/// maximum size, in bytes, of a tuple's `value1`
pub const MAX_VALUE1_LEN: usize = 256;

/// maximum number of doubles in a tuple's `value2`
pub const MAX_VALUE2_LEN: usize = 32;

/// result code of a successful operation
pub const STATUS_OK: i32 = 0;

/// result code of a failed operation (invalid argument, key not found, key exists...)
pub const STATUS_ERROR: i32 = -1;

/// result code of an EXIST request for a key that is present
pub const STATUS_PRESENT: i32 = 1;

/// The operation codes understood by the tuple service. The discriminants are the
/// op codes sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// destroy every stored tuple
    Init = 0,
    /// store a new tuple
    SetValue = 1,
    /// fetch a tuple
    GetValue = 2,
    /// replace the values of an existing tuple
    ModifyValue = 3,
    /// delete a tuple
    DeleteKey = 4,
    /// test whether a tuple exists
    Exist = 5,
}

impl Op {
    /// the op code as sent on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// looks up the operation for a wire op code
    pub fn from_code(code: u8) -> Option<Op> {
        match code {
            0 => Some(Op::Init),
            1 => Some(Op::SetValue),
            2 => Some(Op::GetValue),
            3 => Some(Op::ModifyValue),
            4 => Some(Op::DeleteKey),
            5 => Some(Op::Exist),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Init => "INIT",
            Op::SetValue => "SET_VALUE",
            Op::GetValue => "GET_VALUE",
            Op::ModifyValue => "MODIFY_VALUE",
            Op::DeleteKey => "DELETE_KEY",
            Op::Exist => "EXIST",
        };
        f.write_str(name)
    }
}

impl FromStr for Op {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self> {
        let code: u8 = s
            .parse()
            .map_err(|_| TupleError::MalformedRequest(format!("op code '{}' is not a number", s)))?;
        Op::from_code(code)
            .ok_or_else(|| TupleError::MalformedRequest(format!("unknown op code {}", code)))
    }
}

/// The values stored under a key: a short string and a small vector of doubles.
///
/// `value1` must be 1..=256 bytes and must not contain the protocol delimiter (a space) or
/// a line terminator; `value2` must hold between 1 and 32 doubles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    /// the string value
    pub value1: String,
    /// the vector value
    pub value2: Vec<f64>,
}

impl Tuple {
    /// builds a `Tuple`, validating the shape of both values
    ///
    /// # Errors
    /// returns [`TupleError::InvalidArgument`] if `value1` or `value2` violate the size limits
    pub fn new(value1: impl Into<String>, value2: Vec<f64>) -> Result<Self> {
        let tuple = Tuple {
            value1: value1.into(),
            value2,
        };
        tuple.validate()?;
        Ok(tuple)
    }

    /// checks that this tuple can be stored and sent over the wire
    pub fn validate(&self) -> Result<()> {
        if self.value1.is_empty() {
            return Err(TupleError::InvalidArgument("value1 must not be empty".into()));
        }
        if self.value1.len() > MAX_VALUE1_LEN {
            return Err(TupleError::InvalidArgument(format!(
                "value1 is {} bytes, at most {} are allowed",
                self.value1.len(),
                MAX_VALUE1_LEN
            )));
        }
        if self.value1.contains(|c: char| c == ' ' || c == '\n' || c == '\0') {
            return Err(TupleError::InvalidArgument(
                "value1 must not contain spaces, newlines or NUL bytes".into(),
            ));
        }
        if self.value2.is_empty() || self.value2.len() > MAX_VALUE2_LEN {
            return Err(TupleError::InvalidArgument(format!(
                "value2 holds {} doubles, between 1 and {} are allowed",
                self.value2.len(),
                MAX_VALUE2_LEN
            )));
        }
        Ok(())
    }
}

/// These are the requests that can be made to the tuple service
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// destroy all tuples
    Init,
    /// store `tuple` under `key`, failing if the key exists
    Set {
        /// the key to set
        key: i32,
        /// the values to store
        tuple: Tuple,
    },
    /// fetch the tuple stored under `key`
    Get {
        /// the key to search for
        key: i32,
    },
    /// replace the tuple stored under `key`
    Modify {
        /// the key to modify
        key: i32,
        /// the new values
        tuple: Tuple,
    },
    /// delete the tuple stored under `key`
    Delete {
        /// the key to delete
        key: i32,
    },
    /// test whether `key` is present
    Exist {
        /// the key to test
        key: i32,
    },
}

impl Request {
    /// the operation code of this request
    pub fn op(&self) -> Op {
        match self {
            Request::Init => Op::Init,
            Request::Set { .. } => Op::SetValue,
            Request::Get { .. } => Op::GetValue,
            Request::Modify { .. } => Op::ModifyValue,
            Request::Delete { .. } => Op::DeleteKey,
            Request::Exist { .. } => Op::Exist,
        }
    }

    /// the key this request targets, `None` for INIT
    pub fn key(&self) -> Option<i32> {
        match self {
            Request::Init => None,
            Request::Set { key, .. }
            | Request::Get { key }
            | Request::Modify { key, .. }
            | Request::Delete { key }
            | Request::Exist { key } => Some(*key),
        }
    }

    /// validates any tuple carried by the request
    pub fn validate(&self) -> Result<()> {
        match self {
            Request::Set { tuple, .. } | Request::Modify { tuple, .. } => tuple.validate(),
            _ => Ok(()),
        }
    }
}

/// The response returned for any [`Request`]: an operation specific result code, plus the
/// tuple for a successful GET.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `0` on success, `-1` on failure, `1`/`0` for EXIST
    pub result: i32,
    /// the fetched values, only present for a successful GET
    pub tuple: Option<Tuple>,
}

impl Response {
    /// a response carrying only a result code
    pub fn status(result: i32) -> Self {
        Response {
            result,
            tuple: None,
        }
    }

    /// a successful GET response
    pub fn found(tuple: Tuple) -> Self {
        Response {
            result: STATUS_OK,
            tuple: Some(tuple),
        }
    }

    /// the generic failure response
    pub fn error() -> Self {
        Response::status(STATUS_ERROR)
    }
}

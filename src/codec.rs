//! Text line encoding of [`Request`]s and [`Response`]s.
//!
//! Every message is a single line of space separated fields, terminated by a NUL byte when
//! written. Readers accept either NUL or `\n` as terminator.
//!
//! ```text
//! request:       <op> [<key>] [<value1> <N> <v0> ... <vN-1>]
//! GET response:  <result> <value1> <N> <v0> ... <vN-1>      (result == 0)
//! any response:  <result>
//! ```
//!
//! Integers are written in plain decimal. Doubles use the shortest decimal representation
//! that parses back to the exact same `f64`, so values survive a round trip bit for bit.
use std::fmt::Display;
use std::io::{self, BufRead, ErrorKind, Write};
use std::str::FromStr;

use tracing::warn;

use crate::command::{Op, Request, Response, Tuple, MAX_VALUE1_LEN, MAX_VALUE2_LEN, STATUS_OK};
use crate::{Result, TupleError};

/// the field delimiter
pub const DELIMITER: char = ' ';

/// terminator written after every message
pub const TERMINATOR: u8 = b'\0';

const OP_WIDTH: usize = 1;
// "-2147483648"
const INT_WIDTH: usize = 11;
const COUNT_WIDTH: usize = 2;
// "-0." followed by up to 324 fraction digits for the smallest subnormals
const DOUBLE_WIDTH: usize = 327;
const VALUES_WIDTH: usize =
    MAX_VALUE1_LEN + 1 + COUNT_WIDTH + MAX_VALUE2_LEN * (1 + DOUBLE_WIDTH);

/// longest possible request frame, terminator included
pub const MAX_REQUEST_LEN: usize = OP_WIDTH + 1 + INT_WIDTH + 1 + VALUES_WIDTH + 1;

/// longest possible response frame, terminator included
pub const MAX_RESPONSE_LEN: usize = INT_WIDTH + 1 + VALUES_WIDTH + 1;

/// encodes a request into a line (without terminator)
///
/// # Errors
/// returns [`TupleError::InvalidArgument`] if the request carries a tuple that can not be
/// represented on the wire
pub fn encode_request(request: &Request) -> Result<String> {
    request.validate()?;
    let mut line = request.op().code().to_string();
    match request {
        Request::Init => {}
        Request::Get { key } | Request::Delete { key } | Request::Exist { key } => {
            push_field(&mut line, key);
        }
        Request::Set { key, tuple } | Request::Modify { key, tuple } => {
            push_field(&mut line, key);
            push_tuple(&mut line, tuple);
        }
    }
    debug_assert!(line.len() < MAX_REQUEST_LEN);
    Ok(line)
}

/// decodes a request line (without terminator)
///
/// # Errors
/// returns [`TupleError::MalformedRequest`] if the op code is unknown, or a field is missing,
/// unparseable, out of range, or unexpected
pub fn decode_request(line: &str) -> Result<Request> {
    let mut fields = Fields::new(line, TupleError::MalformedRequest);
    let op: Op = fields.next("op code")?.parse()?;
    let request = match op {
        Op::Init => Request::Init,
        Op::SetValue => Request::Set {
            key: fields.parse("key")?,
            tuple: fields.tuple()?,
        },
        Op::GetValue => Request::Get {
            key: fields.parse("key")?,
        },
        Op::ModifyValue => Request::Modify {
            key: fields.parse("key")?,
            tuple: fields.tuple()?,
        },
        Op::DeleteKey => Request::Delete {
            key: fields.parse("key")?,
        },
        Op::Exist => Request::Exist {
            key: fields.parse("key")?,
        },
    };
    fields.finish()?;
    Ok(request)
}

/// encodes the response to a request of type `op` into a line (without terminator)
pub fn encode_response(op: Op, response: &Response) -> String {
    let mut line = response.result.to_string();
    if op == Op::GetValue && response.result == STATUS_OK {
        match &response.tuple {
            Some(tuple) if tuple.validate().is_ok() => push_tuple(&mut line, tuple),
            _ => {
                warn!("GET response has no valid tuple to send, answering with an error");
                return Response::error().result.to_string();
            }
        }
    }
    line
}

/// decodes the response line for a request of type `op`
///
/// # Errors
/// returns [`TupleError::MalformedResponse`] if the line does not match the shape expected
/// for `op`
pub fn decode_response(line: &str, op: Op) -> Result<Response> {
    let mut fields = Fields::new(line, TupleError::MalformedResponse);
    let result: i32 = fields.parse("result")?;
    let response = if op == Op::GetValue && result == STATUS_OK {
        Response::found(fields.tuple()?)
    } else {
        Response::status(result)
    };
    fields.finish()?;
    Ok(response)
}

/// writes `line` followed by the terminator and flushes the writer
pub fn write_frame<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(&[TERMINATOR])?;
    writer.flush()
}

/// reads one frame of at most `limit` bytes (terminator included).
///
/// Returns `Ok(None)` if the stream ended before any byte was read. A stream that ends in
/// the middle of a frame is an [`ErrorKind::UnexpectedEof`] error, a frame longer than
/// `limit` or one that is not UTF-8 is an [`ErrorKind::InvalidData`] error.
pub fn read_frame<R: BufRead>(reader: &mut R, limit: usize) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "stream ended in the middle of a message",
            ));
        }

        match available.iter().position(|b| *b == TERMINATOR || *b == b'\n') {
            Some(end) => {
                if line.len() + end + 1 > limit {
                    return Err(frame_too_long(limit));
                }
                line.extend_from_slice(&available[..end]);
                reader.consume(end + 1);
                break;
            }
            None => {
                let len = available.len();
                // the terminator still has to fit
                if line.len() + len + 1 > limit {
                    return Err(frame_too_long(limit));
                }
                line.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }

    String::from_utf8(line)
        .map(Some)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

fn frame_too_long(limit: usize) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("message exceeds the maximum length of {} bytes", limit),
    )
}

fn push_field<T: Display>(line: &mut String, value: T) {
    line.push(DELIMITER);
    line.push_str(&value.to_string());
}

fn push_tuple(line: &mut String, tuple: &Tuple) {
    push_field(line, &tuple.value1);
    push_field(line, tuple.value2.len());
    for value in &tuple.value2 {
        push_field(line, value);
    }
}

/// positional reader over the tokens of a line; every access is bounds checked and reported
/// through `error`
struct Fields<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    error: fn(String) -> TupleError,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str, error: fn(String) -> TupleError) -> Self {
        Fields {
            tokens: line.split(DELIMITER).filter(|t| !t.is_empty()).collect(),
            pos: 0,
            error,
        }
    }

    fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }

    fn next(&mut self, name: &str) -> Result<&'a str> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| (self.error)(format!("missing field '{}'", name)))?;
        self.pos += 1;
        Ok(token)
    }

    fn parse<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let token = self.next(name)?;
        token
            .parse()
            .map_err(|_| (self.error)(format!("field '{}' has an invalid value '{}'", name, token)))
    }

    fn tuple(&mut self) -> Result<Tuple> {
        let value1 = self.next("value1")?.to_string();
        let count: usize = self.parse("N")?;
        if count == 0 || count > MAX_VALUE2_LEN {
            return Err((self.error)(format!(
                "N is {}, it must be between 1 and {}",
                count, MAX_VALUE2_LEN
            )));
        }
        if self.remaining() < count {
            return Err((self.error)(format!(
                "N declares {} doubles but only {} fields follow",
                count,
                self.remaining()
            )));
        }

        let mut value2 = Vec::with_capacity(count);
        for _ in 0..count {
            value2.push(self.parse("value2")?);
        }
        Tuple::new(value1, value2).map_err(|e| (self.error)(e.to_string()))
    }

    fn finish(self) -> Result<()> {
        if self.remaining() > 0 {
            return Err((self.error)(format!(
                "{} unexpected trailing fields",
                self.remaining()
            )));
        }
        Ok(())
    }
}

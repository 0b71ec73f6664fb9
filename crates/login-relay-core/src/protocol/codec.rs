//! Frame encoding and tolerant reply decoding.
//!
//! Outgoing frames are compact JSON terminated by `\n`. Slashes stay
//! unescaped and non-ASCII text is written as `\uXXXX` escapes, which is the
//! exact byte layout the deployed backend already parses.

use std::io;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{Formatter, Serializer};
use thiserror::Error;

use super::types::{LoginCommand, LoginResult};
use crate::error::Result;

/// Frame delimiter on the backend connection.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Compact formatter that escapes every non-ASCII character.
#[derive(Debug, Default, Clone, Copy)]
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(ch.encode_utf8(&mut [0; 4]).as_bytes())?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize any value with the backend's JSON conventions, no delimiter.
pub fn to_wire_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    let mut ser = Serializer::with_formatter(&mut out, AsciiFormatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Encode a command as one complete request frame.
pub fn encode_command(command: &LoginCommand) -> Result<Vec<u8>> {
    let mut frame = to_wire_json(command)?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Why a reply could not be used as a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("empty reply")]
    Empty,

    #[error("reply exceeds {limit} bytes")]
    TooLong { limit: usize },

    #[error("no complete line before read timeout")]
    Timeout,

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("reply is JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Outcome of reading one reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Object(LoginResult),
    Malformed(MalformedReason),
}

impl Reply {
    /// Collapse into a result; malformed replies become an empty (failed) one.
    pub fn into_result(self) -> LoginResult {
        match self {
            Self::Object(result) => result,
            Self::Malformed(_) => LoginResult::empty(),
        }
    }
}

/// Decode one reply line. Never fails; problems come back as `Malformed`.
pub fn decode_reply(line: &[u8]) -> Reply {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if line.iter().all(u8::is_ascii_whitespace) {
        return Reply::Malformed(MalformedReason::Empty);
    }

    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Reply::Object(map.into()),
        Ok(other) => Reply::Malformed(MalformedReason::NotAnObject(json_kind(&other))),
        Err(e) => Reply::Malformed(MalformedReason::InvalidJson(e.to_string())),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

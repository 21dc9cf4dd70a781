//! Error types shared by the codec and the RPC endpoint.
//!
//! Errors fall into two groups:
//!
//! - **Fatal** errors (`Io`, `UnexpectedEof`, `UnknownCode`, `Protocol`, `Closed`)
//!   poison the decoder or tear down the endpoint.
//! - **Recoverable** errors (`Convert`, `LongValue`, `Peer`, `Indexed`,
//!   `InvalidArgument`) are attached to one operation and never affect other calls.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::msgpack::{Value, WireType};

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the codec and the RPC endpoint.
///
/// The type is `Clone` so a latched decoder error or the error that closed an
/// endpoint can be reported to every later caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The stream ended cleanly between two values.
    #[error("msgpack: end of stream")]
    Eof,

    /// The stream ended in the middle of a value.
    #[error("msgpack: unexpected end of stream")]
    UnexpectedEof,

    /// Reserved lead byte (`0xc1`).
    #[error("msgpack: unknown format code {0:#04x}")]
    UnknownCode(u8),

    /// An outgoing length does not fit in 32 bits.
    #[error("msgpack: length {0} is too long to encode")]
    LongValue(u64),

    /// A wire value could not be assigned to its destination.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// A struct tag could not be parsed.
    #[error("msgpack: {type_name}.{field}: {reason}")]
    InvalidTag {
        /// Struct the field belongs to.
        type_name: &'static str,
        /// Rust field name.
        field: &'static str,
        /// What was wrong with the tag.
        reason: String,
    },

    /// Transport read or write failure.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// Malformed RPC message framing.
    #[error("rpc: {0}")]
    Protocol(String),

    /// The endpoint is closed.
    #[error("rpc: session closed")]
    Closed,

    /// A handler's arguments could not be decoded.
    #[error("rpc: invalid argument: {0}")]
    InvalidArgument(String),

    /// Error value returned by the peer.
    #[error("{}", PeerMessage(.0))]
    Peer(Value),

    /// A sub-call of a batch failed on the peer.
    #[error("batch call {index}: {source}")]
    Indexed {
        /// Position of the failed call within the batch.
        index: usize,
        /// The peer error for that call.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for errors that leave the stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Eof
                | Error::UnexpectedEof
                | Error::UnknownCode(_)
                | Error::Io(_)
                | Error::Protocol(_)
                | Error::Closed
        )
    }

    /// Message text of a peer error.
    ///
    /// The editor reports errors as `[kind, message]`; plain strings are
    /// returned as-is.
    pub fn peer_message(&self) -> Option<&str> {
        match self {
            Error::Peer(value) => peer_message(value),
            Error::Indexed { source, .. } => source.peer_message(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
            _ => Error::Io(Arc::new(err)),
        }
    }
}

fn peer_message(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }),
        _ => None,
    }
}

struct PeerMessage<'a>(&'a Value);

impl fmt::Display for PeerMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match peer_message(self.0) {
            Some(message) => f.write_str(message),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A wire value that could not be converted to its destination type.
///
/// Decoding records the first conversion failure, skips the offending value
/// and keeps going. The enclosing decode returns it once the value is complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("msgpack: cannot convert {found} to {target}{}", detail_suffix(.detail))]
pub struct ConvertError {
    /// Wire type that was found.
    pub found: WireType,
    /// Destination type name.
    pub target: &'static str,
    /// Extra context (the offending value, out-of-range number, ...).
    pub detail: Option<String>,
}

impl ConvertError {
    pub fn new(found: WireType, target: &'static str) -> Self {
        Self {
            found,
            target,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({})", d),
        None => String::new(),
    }
}

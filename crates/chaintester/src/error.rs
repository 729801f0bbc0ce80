// ChainTester - IPC test harness for EOSIO chain debuggers
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error surface of the chain tester.
//!
//! Every failure is reported through [`ChainTesterError`]. The variants follow
//! the layers a call passes through:
//!
//! - **Transport** - socket, read, write or framing failures ([`ChainTesterError::Connect`],
//!   [`ChainTesterError::Transport`]). The session is usually unusable afterwards.
//! - **Protocol** - the peer answered with the wrong method, sequence id or
//!   message type ([`ProtocolError`]). Fatal to the call.
//! - **Exception** - the peer answered with an application exception.
//! - **Transaction** - the debugger executed the request but the chain rejected it
//!   ([`TransactionError`]). The raw response body is kept for inspection.
//! - **Assertion** - a check inside a native apply handler failed ([`AssertionError`]).
//! - **Usage** - the API was used in a way that can never succeed, such as a VM-API
//!   call outside of an apply context.

use std::{fmt, io, path::PathBuf};

use chaintester_common::ConfigError;
use thiserror::Error;

use crate::json::{JsonError, JsonValue};

/// Result alias used throughout the crate
pub type Result<T, E = ChainTesterError> = std::result::Result<T, E>;

/// Errors produced by the chain tester
#[derive(Debug, Error)]
pub enum ChainTesterError {
    /// A connection to the debugger could not be established
    #[error("failed to connect {channel} channel to {addr}: {source}")]
    Connect {
        /// Channel label (`control`, `callback`, `vm_api`)
        channel: &'static str,
        /// Address that was dialed or bound
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Socket, read, write or framing failure on an established channel
    #[error("transport error on {channel} channel: {source}")]
    Transport {
        /// Channel label
        channel: &'static str,
        /// Error reported by the RPC framework
        #[source]
        source: thrift::Error,
    },

    /// The peer violated the message protocol
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer answered with an application exception
    #[error("{method} raised an exception on {channel} channel: {source}")]
    Exception {
        /// Channel label
        channel: &'static str,
        /// Method that was called
        method: String,
        /// Decoded exception
        #[source]
        source: thrift::ApplicationError,
    },

    /// The chain rejected the transaction
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A native apply handler check failed
    #[error(transparent)]
    Assertion(#[from] AssertionError),

    /// The API was misused
    #[error("usage error: {0}")]
    Usage(String),

    /// A JSON response could not be parsed or traversed
    #[error(transparent)]
    Json(#[from] JsonError),

    /// A response was well-formed but did not hold the expected data
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A contract file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The debugger configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ChainTesterError {
    /// Map an error raised by the RPC framework on the given channel
    pub fn from_thrift(channel: &'static str, err: thrift::Error) -> Self {
        match err {
            thrift::Error::Protocol(e) => {
                Self::Protocol(ProtocolError::new(ProtocolErrorKind::Codec, e.to_string()))
            }
            other => Self::Transport { channel, source: other },
        }
    }

    /// The transaction error, if the chain rejected the request
    pub fn as_transaction(&self) -> Option<&TransactionError> {
        match self {
            Self::Transaction(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this error was caused by API misuse
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// True when the framework error means the peer went away
pub(crate) fn is_disconnect(err: &thrift::Error) -> bool {
    matches!(
        err,
        thrift::Error::Transport(thrift::TransportError {
            kind: thrift::TransportErrorKind::EndOfFile | thrift::TransportErrorKind::NotOpen,
            ..
        })
    )
}

/// Kinds of message protocol violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Reply names a different method than the request
    WrongMethodName,
    /// Reply carries a different sequence id than the request
    BadSequenceId,
    /// Message is neither a reply nor an exception
    InvalidMessageType,
    /// Reply struct lacks the result field
    MissingResult,
    /// Payload could not be decoded
    Codec,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WrongMethodName => "WRONG_METHOD_NAME",
            Self::BadSequenceId => "BAD_SEQUENCE_ID",
            Self::InvalidMessageType => "INVALID_MESSAGE_TYPE",
            Self::MissingResult => "MISSING_RESULT",
            Self::Codec => "CODEC",
        };
        f.write_str(name)
    }
}

/// A message protocol violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProtocolError {
    /// What went wrong
    pub kind: ProtocolErrorKind,
    /// Human-readable description
    pub message: String,
}

impl ProtocolError {
    /// Create a new protocol error
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// The chain rejected a transaction; holds the raw debugger response
#[derive(Clone, PartialEq, Eq, Error)]
#[error("{}", String::from_utf8_lossy(&self.body))]
pub struct TransactionError {
    body: Vec<u8>,
}

impl TransactionError {
    /// Wrap a raw response body
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }

    /// Raw response body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parse the body so `except`, `except.stack`, etc. can be inspected
    pub fn json(&self) -> Result<JsonValue, JsonError> {
        JsonValue::parse(&self.body)
    }
}

impl fmt::Debug for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionError").field("body", &String::from_utf8_lossy(&self.body)).finish()
    }
}

/// A check inside a native apply handler failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("assertion failed: {message}")]
pub struct AssertionError {
    /// Message supplied with the failed check
    pub message: String,
}

impl AssertionError {
    /// Create a new assertion error
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Parse a debugger response body, lifting `except` objects into [`TransactionError`]
pub fn lift_json_response(body: &[u8]) -> Result<JsonValue> {
    let value = JsonValue::parse(body)?;
    if value.contains_key("except") {
        return Err(TransactionError::new(body.to_vec()).into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_path;

    #[test]
    fn test_lift_plain_response() {
        let value = lift_json_response(br#"{"server_version":"abc"}"#).unwrap();
        assert_eq!(value.get_string(json_path!["server_version"]).unwrap(), "abc");
    }

    #[test]
    fn test_lift_except_response() {
        let body = br#"{"except":{"code":3050003,"stack":[{"format":"oops"}]}}"#;
        let err = lift_json_response(body).unwrap_err();
        let tx = err.as_transaction().expect("transaction error");
        assert_eq!(tx.body(), body);

        let json = tx.json().unwrap();
        assert!(json.get(json_path!["except", "stack"]).is_ok());
        assert!(tx.to_string().contains("3050003"));
    }

    #[test]
    fn test_lift_rejects_garbage() {
        assert!(matches!(lift_json_response(b"not json"), Err(ChainTesterError::Json(_))));
    }

    #[test]
    fn test_disconnect_detection() {
        let eof = thrift::Error::Transport(thrift::TransportError::new(
            thrift::TransportErrorKind::EndOfFile,
            "eof",
        ));
        let timeout = thrift::Error::Transport(thrift::TransportError::new(
            thrift::TransportErrorKind::TimedOut,
            "slow",
        ));
        assert!(is_disconnect(&eof));
        assert!(!is_disconnect(&timeout));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::new(ProtocolErrorKind::BadSequenceId, "push_action: out of order");
        assert_eq!(err.to_string(), "BAD_SEQUENCE_ID: push_action: out of order");
    }
}

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Boxed error used for body streams, matching what hyper and axum accept.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Direction of a byte stream relative to the instrumented side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification attached to a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "operation", rename_all = "lowercase")]
pub enum ErrorKind {
    /// The transport failed before a response existed.
    Network(Operation),
    /// The peer answered with a well-formed error reply.
    Response,
}

impl ErrorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(op) => write!(f, "network/{op}"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// Failure returned by a round-trip capability.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network {op} error: {source}")]
    Network {
        op: Operation,
        #[source]
        source: io::Error,
    },

    #[error("response error: {0}")]
    Response(String),
}

impl TransportError {
    pub fn network(op: Operation, source: impl Into<io::Error>) -> Self {
        Self::Network {
            op,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { op, .. } => ErrorKind::Network(*op),
            Self::Response(_) => ErrorKind::Response,
        }
    }
}

/// Errors surfaced by the statistics query path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

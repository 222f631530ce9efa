use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Tabletdb errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// On-disk or wire data that failed a structural check.
    Corruption(String),
    /// A state-machine guard failed, e.g. a decision queried before the
    /// election decided, or an iterator used before Init.
    IllegalState(String),
    /// A protocol violation by the caller or a remote peer, e.g. a voter
    /// flipping its vote within one election.
    InvalidArgument(String),
    /// An IO error.
    Io(String),
    /// An expected-missing condition, e.g. a snapshot that excludes a whole
    /// delta store, or an empty anchor registry.
    NotFound(String),
    /// A write was attempted on a read-only structure (closed delta
    /// memstore, finalized delta file).
    ReadOnly,
    /// Shutdown in progress.
    ServiceUnavailable(String),
    /// A deadline elapsed while waiting.
    TimedOut(String),
}

impl Error {
    /// True for the expected-missing kind, which callers routinely skip over
    /// rather than propagate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::IllegalState(msg) => write!(f, "illegal state: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::NotFound(msg) => write!(f, "not found: {msg}"),
            Error::ReadOnly => write!(f, "write attempted on read-only structure"),
            Error::ServiceUnavailable(msg) => write!(f, "service unavailable: {msg}"),
            Error::TimedOut(msg) => write!(f, "timed out: {msg}"),
        }
    }
}

/// A tabletdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Corruption(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Io(err.to_string())
    }
}

//! Runtime errors.

use muxrpc::Failure;

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The broker refused an operation.
    Transport(TransportError),
    /// A message could not be encoded or decoded.
    Codec(muxrpc::Error),
    /// The server answered with a failure.
    Remote(Failure),
    /// The session ended before an answer arrived.
    ConnectionLost(String),
    /// No reply arrived within the call timeout.
    Timeout,
    /// The reply was well-formed but not the shape the caller asked for.
    UnexpectedReply(String),
}

impl Error {
    /// True if the server was reached and reported a failure, false if the
    /// server could not be reached or did not answer.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Remote(failure) => write!(f, "Remote failure: {}", failure),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
            Self::UnexpectedReply(msg) => write!(f, "Unexpected reply: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Remote(f) => Some(f),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<muxrpc::Error> for Error {
    fn from(e: muxrpc::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        Self::Remote(f)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! # Error Definitions
//!
//! Codec failures (`Error`) and remote failures (`Failure`) are kept apart:
//! the first means a message could not be read or written, the second is a
//! perfectly well-formed answer saying the remote side could not do the work.

use muxpack::Error as PackError;

/// Failures of the wire codec itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying muxpack layer failed (truncation, bad tag, trailing bytes).
    Pack(PackError),
    /// An unknown message tag, notification kind or failure kind.
    UnknownVariant(String),
    /// The message is structurally well-formed but breaks the protocol.
    ProtocolViolation(String),
    /// A required envelope attribute is absent.
    MissingAttribute(&'static str),
    /// An envelope attribute has the wrong type.
    AttributeType { name: String, expected: &'static str },
    /// Values nest deeper than the codec allows.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "pack error: {}", e),
            Self::UnknownVariant(what) => write!(f, "unknown variant: {}", what),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::MissingAttribute(name) => write!(f, "missing attribute '{}'", name),
            Self::AttributeType { name, expected } => {
                write!(f, "attribute '{}' is not a {}", name, expected)
            }
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds the recursion limit"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Pack(e)
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a remote operation did not produce a value.
///
/// Carried in the error side of an `RpcReply` and in `Notification::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The server has no method registered under the requested name.
    MethodNotFound(String),
    /// The arguments were rejected before the method ran.
    BadArguments(String),
    /// The method (or a stream it returned) raised an error.
    Application(String),
    /// The peer went away before the operation finished.
    Disconnected(String),
    /// The remote side received something it could not understand.
    ProtocolViolation(String),
}

impl Failure {
    /// Wire name of the failure kind.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::MethodNotFound(_) => "method-not-found",
            Self::BadArguments(_) => "bad-arguments",
            Self::Application(_) => "application",
            Self::Disconnected(_) => "disconnected",
            Self::ProtocolViolation(_) => "protocol-violation",
        }
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        match self {
            Self::MethodNotFound(m)
            | Self::BadArguments(m)
            | Self::Application(m)
            | Self::Disconnected(m)
            | Self::ProtocolViolation(m) => m,
        }
    }

    /// Rebuilds a failure from its wire name and detail.
    pub fn from_tag(tag: &str, message: impl Into<String>) -> Result<Self> {
        let message = message.into();
        match tag {
            "method-not-found" => Ok(Self::MethodNotFound(message)),
            "bad-arguments" => Ok(Self::BadArguments(message)),
            "application" => Ok(Self::Application(message)),
            "disconnected" => Ok(Self::Disconnected(message)),
            "protocol-violation" => Ok(Self::ProtocolViolation(message)),
            _ => Err(Error::UnknownVariant(format!("failure kind: {}", tag))),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.as_tag(), self.message())
    }
}

impl std::error::Error for Failure {}

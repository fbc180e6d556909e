//! Error taxonomy for the service core.
//!
//! Every per-call failure ends up as a [`Fault`]: a named, human readable
//! error reply. Source-level parse problems are the exception; they are
//! absorbed into the document's diagnostics and never reach the caller.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;

use thiserror::Error;

use crate::bus::BUS_NAME_PREFIX;
use crate::diagnostics::ParseProblem;

const DBUS_ERROR: &str = "org.freedesktop.DBus.Error";

/// Malformed or misaddressed client calls. Raised before any state changes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid arguments for {member}: {source}")]
    InvalidArgs {
        member: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("document path must not be empty")]
    EmptyPath,
    #[error("no object at `{0}`")]
    UnknownObject(String),
    #[error("object `{path}` does not implement `{interface}`")]
    UnknownInterface { path: String, interface: String },
    #[error("no method `{member}` on interface `{interface}`")]
    UnknownMethod { interface: String, member: String },
}

impl ProtocolError {
    pub fn fault_name(&self) -> String {
        let short = match self {
            ProtocolError::InvalidArgs { .. } | ProtocolError::EmptyPath => "InvalidArgs",
            ProtocolError::UnknownObject(_) => "UnknownObject",
            ProtocolError::UnknownInterface { .. } => "UnknownInterface",
            ProtocolError::UnknownMethod { .. } => "UnknownMethod",
        };
        format!("{DBUS_ERROR}.{short}")
    }
}

/// An unexpected handler failure. Becomes a fault reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct Failure {
    pub name: Cow<'static, str>,
    pub message: String,
    pub location: Option<String>,
}

impl Failure {
    /// Record where the failure was raised along with its name and message.
    #[track_caller]
    pub fn new(name: impl Into<Cow<'static, str>>, message: impl fmt::Display) -> Self {
        let caller = Location::caller();
        Self {
            name: name.into(),
            message: message.to_string(),
            location: Some(format!(
                "{}:{}.{}",
                caller.file(),
                caller.line(),
                caller.column()
            )),
        }
    }
}

/// Errors raised by backend handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The source itself is broken. Converted into ERROR diagnostics.
    #[error("source contains {} problem(s)", .0.len())]
    Parse(Vec<ParseProblem>),
    /// Anything else.
    #[error(transparent)]
    Failed(#[from] Failure),
}

impl HandlerError {
    #[track_caller]
    pub fn failed(name: impl Into<Cow<'static, str>>, message: impl fmt::Display) -> Self {
        HandlerError::Failed(Failure::new(name, message))
    }

    pub fn parse(problem: ParseProblem) -> Self {
        HandlerError::Parse(vec![problem])
    }
}

impl From<std::io::Error> for HandlerError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        HandlerError::failed(format!("{:?}", err.kind()), err)
    }
}

/// A reply body that does not fit the method's declared output signature.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarshalError {
    #[error("invalid signature `{signature}`: {reason}")]
    InvalidSignature { signature: String, reason: String },
    #[error("expected {expected} value(s), found {found}")]
    Arity { expected: usize, found: usize },
    #[error("expected `{expected}` at {at}, found {found}")]
    Mismatch {
        expected: String,
        found: &'static str,
        at: String,
    },
}

/// Failures of the bus substrate itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to export `{interface}` at `{path}`: {reason}")]
    Export {
        path: String,
        interface: String,
        reason: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A per-call error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub name: String,
    pub message: String,
    /// Where the error originated, when known. Unrelated to diagnostic locations.
    pub location: Option<String>,
}

impl Fault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn protocol(err: &ProtocolError) -> Self {
        Self::new(err.fault_name(), err.to_string())
    }

    /// Convert a handler failure, qualifying bare error names with the
    /// service's error namespace.
    pub fn handler(language: &str, failure: Failure) -> Self {
        let Failure {
            name,
            message,
            location,
        } = failure;
        let name = if name.contains('.') {
            name.into_owned()
        } else {
            format!("{}.Error.{}", error_namespace(language), name)
        };
        Self {
            name,
            message,
            location,
        }
    }

    /// `context` describes the call as `path(interface.member) -> signature`.
    pub fn marshal(language: &str, context: &str, err: &MarshalError) -> Self {
        Self::new(
            format!("{}.ValueError", error_namespace(language)),
            format!("Failed to encode return value in `{context}`: {err}"),
        )
    }

    pub fn transport(err: &TransportError) -> Self {
        Self::new(format!("{DBUS_ERROR}.Failed"), err.to_string())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}: {}", self.name, location, self.message),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}

pub fn error_namespace(language: &str) -> String {
    format!("{BUS_NAME_PREFIX}.{language}")
}

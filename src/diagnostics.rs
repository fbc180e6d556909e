//! Diagnostic value types exchanged with clients.
//!
//! These are plain values: a fresh list is built for every parse and the
//! wire representation is the tuple layout of the `Diagnostics` signature,
//! `a(ua((x(xx)(xx))s)a(x(xx)(xx))s)`.

use serde_json::{json, Value};

/// Diagnostic severity, encoded on the wire as an unsigned integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Severity {
    #[default]
    None = 0,
    Info = 1,
    Warning = 2,
    Deprecated = 3,
    Error = 4,
    Fatal = 5,
}

impl Severity {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A line/column position inside a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLocation {
    pub line: i64,
    pub column: i64,
}

impl SourceLocation {
    pub fn new(line: i64, column: i64) -> Self {
        Self { line, column }
    }

    /// A zero-width range at this location.
    pub fn to_range(self, file: i64) -> SourceRange {
        SourceRange {
            file,
            start: self,
            end: self,
        }
    }

    pub fn to_value(self) -> Value {
        json!([self.line, self.column])
    }
}

impl From<(i64, i64)> for SourceLocation {
    fn from((line, column): (i64, i64)) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SourceRange {
    /// Index of the file the range refers to; 0 is the document itself.
    pub file: i64,
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceRange {
    pub fn new(file: i64, start: SourceLocation, end: SourceLocation) -> Self {
        Self { file, start, end }
    }

    pub fn to_value(self) -> Value {
        json!([self.file, self.start.to_value(), self.end.to_value()])
    }
}

/// A suggested replacement for a range of text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fixit {
    pub location: SourceRange,
    pub replacement: String,
}

impl Fixit {
    pub fn to_value(&self) -> Value {
        json!([self.location.to_value(), self.replacement])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub severity: Severity,
    pub fixits: Vec<Fixit>,
    pub locations: Vec<SourceRange>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, locations: Vec<SourceRange>, message: impl Into<String>) -> Self {
        Self {
            severity,
            fixits: Vec::new(),
            locations,
            message: message.into(),
        }
    }

    /// Create an error diagnostic pointing at a single location.
    pub fn error_at(location: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, vec![location.to_range(0)], message)
    }

    pub fn with_fixit(mut self, fixit: Fixit) -> Self {
        self.fixits.push(fixit);
        self
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            json!(self.severity.code()),
            Value::Array(self.fixits.iter().map(Fixit::to_value).collect()),
            Value::Array(self.locations.iter().map(|l| l.to_value()).collect()),
            Value::String(self.message.clone()),
        ])
    }
}

/// One source-level problem reported by a backend parser.
///
/// Backends raise these through [`crate::error::HandlerError::Parse`]; the
/// dispatcher turns each into an ERROR diagnostic instead of failing the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseProblem {
    pub line: i64,
    pub column: i64,
    pub message: String,
}

impl ParseProblem {
    pub fn new(line: i64, column: i64, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl From<ParseProblem> for Diagnostic {
    fn from(problem: ParseProblem) -> Self {
        Diagnostic::error_at(
            SourceLocation::new(problem.line, problem.column),
            problem.message,
        )
    }
}

/// Encode a diagnostic list as the body of a `Diagnostics` reply.
pub fn diagnostics_to_value(diagnostics: &[Diagnostic]) -> Value {
    Value::Array(diagnostics.iter().map(Diagnostic::to_value).collect())
}

//! JSON backend.

use serde::Deserialize;
use serde_json::Value;

use crate::backend::{Backend, BackendDescriptor};
use crate::capabilities::Capability;
use crate::diagnostics::ParseProblem;
use crate::document::Document;
use crate::error::HandlerError;
use crate::options::Options;

pub static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    language: "json",
    capabilities: &[Capability::Diagnostics],
    create,
};

fn create() -> Box<dyn Backend> {
    Box::new(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonOptions {
    /// Accept `//` and `/* */` comments.
    #[serde(default)]
    allow_comments: bool,
}

#[derive(Debug, Default)]
pub struct Json;

impl Backend for Json {
    fn parse(&mut self, doc: &mut Document, options: &Options) -> Result<(), HandlerError> {
        let options: JsonOptions = options.decode()?;
        let source = std::fs::read_to_string(&doc.data_path)?;

        if options.allow_comments {
            validate(&blank_comments(&source))
        } else {
            validate(&source)
        }
    }
}

/// Check that `source` is a single well-formed JSON value.
///
/// Problem columns count characters, not bytes.
pub fn validate(source: &str) -> Result<(), HandlerError> {
    match serde_json::from_str::<Value>(source) {
        Ok(_) => Ok(()),
        Err(e) if e.is_io() => Err(HandlerError::failed("IoError", e)),
        Err(e) => Err(HandlerError::parse(ParseProblem::new(
            e.line() as i64,
            char_column(source, e.line(), e.column()) as i64,
            without_position(&e.to_string()),
        ))),
    }
}

// serde_json counts columns in bytes.
fn char_column(source: &str, line: usize, byte_column: usize) -> usize {
    let Some(text) = source.split('\n').nth(line.saturating_sub(1)) else {
        return byte_column;
    };
    text.char_indices()
        .take_while(|(offset, _)| *offset < byte_column)
        .count()
}

// serde_json appends " at line L column C" to its messages.
fn without_position(message: &str) -> String {
    match message.rfind(" at line ") {
        Some(index) => message[..index].to_string(),
        None => message.to_string(),
    }
}

/// Replace comments with spaces, keeping line breaks so that error positions
/// still match the original text. Each character becomes one space, so
/// character columns are kept even where byte offsets shift.
fn blank_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                out.push_str("  ");
                chars.next();
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    out.push(blank(next));
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                out.push_str("  ");
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    out.push(blank(next));
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn blank(c: char) -> char {
    if c == '\n' {
        '\n'
    } else {
        ' '
    }
}

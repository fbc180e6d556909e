//! CSS backend.
//!
//! Stylesheets are parsed with a pest grammar that checks block structure.
//! Syntax errors are reported as parse problems; a successfully parsed sheet
//! is linted for empty rulesets.

use std::path::PathBuf;

use pest::error::{Error, LineColLocation};
use pest::iterators::Pair;
use pest::{Parser, Position};
use pest_derive::Parser;

use crate::backend::{Backend, BackendDescriptor};
use crate::capabilities::Capability;
use crate::diagnostics::{Diagnostic, Fixit, ParseProblem, Severity, SourceLocation, SourceRange};
use crate::document::{Document, ProjectDocuments};
use crate::error::HandlerError;
use crate::options::Options;

#[derive(Parser)]
#[grammar = "languages/css.pest"]
struct CssParser;

pub static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    language: "css",
    capabilities: &[Capability::Diagnostics, Capability::Project],
    create,
};

fn create() -> Box<dyn Backend> {
    Box::new(Css)
}

#[derive(Debug, Default)]
pub struct Css;

impl Backend for Css {
    fn parse(&mut self, doc: &mut Document, _options: &Options) -> Result<(), HandlerError> {
        let source = std::fs::read_to_string(&doc.data_path)?;
        doc.diagnostics = check(&source)?;
        Ok(())
    }

    /// Parses the root and every member that lives under the root's directory.
    /// A member that cannot be read gets an ERROR diagnostic saying so; the
    /// rest of the project is still parsed.
    fn parse_project(
        &mut self,
        project: &mut ProjectDocuments<'_>,
        options: &Options,
    ) -> Result<Vec<PathBuf>, HandlerError> {
        let root = project.root().to_path_buf();
        let dir = root.parent().unwrap_or(&root).to_path_buf();
        let mut parsed: Vec<PathBuf> = Vec::new();

        let members = project.members().to_vec();
        for path in std::iter::once(root.clone()).chain(members) {
            if (path != root && !path.starts_with(&dir)) || parsed.contains(&path) {
                continue;
            }
            let Some(doc) = project.get_mut(&path) else {
                continue;
            };

            let outcome = self.parse(doc, options);
            match doc.settle(outcome) {
                Ok(()) => {}
                Err(failure) if path == root => return Err(failure.into()),
                Err(failure) => {
                    log::warn!("Could not parse {}: {}", path.display(), failure);
                    doc.diagnostics = vec![Diagnostic::error_at(
                        SourceLocation::new(1, 1),
                        failure.message,
                    )];
                }
            }
            log::debug!("{}: {} diagnostic(s)", path.display(), doc.diagnostics.len());
            parsed.push(path);
        }

        Ok(parsed)
    }
}

/// Parse a stylesheet and return its lint diagnostics.
pub fn check(source: &str) -> Result<Vec<Diagnostic>, HandlerError> {
    let stylesheet = CssParser::parse(Rule::stylesheet, source).map_err(syntax_error)?;

    let diagnostics = stylesheet
        .flatten()
        .filter(|pair| pair.as_rule() == Rule::rule)
        .filter_map(empty_ruleset)
        .collect();
    Ok(diagnostics)
}

fn empty_ruleset(ruleset: Pair<'_, Rule>) -> Option<Diagnostic> {
    let block = ruleset.clone().into_inner().find(|p| p.as_rule() == Rule::block)?;
    if block.into_inner().next().is_some() {
        return None;
    }

    let span = ruleset.as_span();
    let range = SourceRange::new(0, location(span.start_pos()), location(span.end_pos()));
    Some(
        Diagnostic::new(Severity::Warning, vec![range], "Empty ruleset").with_fixit(Fixit {
            location: range,
            replacement: String::new(),
        }),
    )
}

fn location(pos: Position<'_>) -> SourceLocation {
    let (line, column) = pos.line_col();
    SourceLocation::new(line as i64, column as i64)
}

fn syntax_error(err: Error<Rule>) -> HandlerError {
    let (line, column) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    let err = err.renamed_rules(describe);
    HandlerError::parse(ParseProblem::new(
        line as i64,
        column as i64,
        err.variant.message(),
    ))
}

fn describe(kind: &Rule) -> String {
    let name = match kind {
        Rule::EOI => "end of input",
        Rule::at_rule => "at-rule",
        Rule::rule => "ruleset",
        Rule::selector => "selector",
        Rule::block => "`{`",
        Rule::declaration => "declaration",
        Rule::property => "property name",
        Rule::value => "value",
        Rule::string => "string",
        Rule::ident => "identifier",
        other => return format!("{other:?}"),
    };
    name.to_string()
}

//! Backend adapter contract.
//!
//! A backend is the language-specific parser behind a service. Each client
//! session owns its own backend instance, created from the backend's static
//! [`BackendDescriptor`]. The descriptor also carries the capability table
//! used for negotiation, so the transport never has to inspect the backend
//! to find out what it supports.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use crate::capabilities::Capability;
use crate::document::{Document, ProjectDocuments};
use crate::error::{Failure, HandlerError};
use crate::options::Options;

pub trait Backend {
    /// Parse `doc` and populate its diagnostics.
    ///
    /// Diagnostics are cleared before this runs. Source-level problems should
    /// be reported as [`HandlerError::Parse`]; any other error fails the call.
    fn parse(&mut self, doc: &mut Document, options: &Options) -> Result<(), HandlerError>;

    /// Release any per-document state before the document goes away.
    fn dispose(&mut self, _doc: &Document) {}

    /// Parse the project's root in the context of its members.
    ///
    /// Only the root and the members named in the call are reachable through
    /// `project`. Returns the canonical paths of the documents that received
    /// fresh results. Only called when the descriptor declares
    /// [`Capability::Project`].
    fn parse_project(
        &mut self,
        project: &mut ProjectDocuments<'_>,
        _options: &Options,
    ) -> Result<Vec<PathBuf>, HandlerError> {
        Err(HandlerError::failed(
            "NotSupported",
            format!("project parsing is not supported for {}", project.root().display()),
        ))
    }
}

/// Static registration record of a backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendDescriptor {
    /// Language name used in bus names and object paths.
    pub language: &'static str,
    pub capabilities: &'static [Capability],
    pub create: fn() -> Box<dyn Backend>,
}

impl BackendDescriptor {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Run a backend handler, turning a panic into an ordinary handler failure.
pub(crate) fn guarded<T>(
    handler: impl FnOnce() -> Result<T, HandlerError>,
) -> Result<T, HandlerError> {
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::warn!("Backend handler panicked: {}", message);
            Err(HandlerError::Failed(Failure {
                name: "Panic".into(),
                message,
                location: None,
            }))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "backend panicked".to_string()
    }
}

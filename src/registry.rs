//! Session registry: bus identity to session.
//!
//! This is the top-level mutable state of the service. It is only touched
//! from the event loop, one event at a time, so it needs no locking.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::backend::BackendDescriptor;
use crate::bus::Bus;
use crate::diagnostics::SourceLocation;
use crate::document::{Document, DocumentLayout};
use crate::error::TransportError;
use crate::session::Session;

type EmptyHook = Box<dyn FnMut()>;

pub struct SessionRegistry {
    descriptor: &'static BackendDescriptor,
    layout: DocumentLayout,
    sessions: HashMap<String, Session>,
    next_id: u64,
    on_empty: Option<EmptyHook>,
}

impl SessionRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Backend every new session instantiates.
    /// * `layout` - Object path and export rules for the sessions' documents.
    pub fn new(descriptor: &'static BackendDescriptor, layout: DocumentLayout) -> Self {
        Self {
            descriptor,
            layout,
            sessions: HashMap::new(),
            next_id: 0,
            on_empty: None,
        }
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    /// Install the hook run whenever the last session goes away.
    pub fn on_empty(&mut self, hook: impl FnMut() + 'static) {
        self.on_empty = Some(Box::new(hook));
    }

    /// Get the session of `identity`, creating it with a fresh backend
    /// instance and the next session id when missing.
    pub fn ensure_session(&mut self, identity: &str) -> &mut Session {
        session_entry(&mut self.sessions, &mut self.next_id, self.descriptor, identity)
    }

    pub fn session(&self, identity: &str) -> Option<&Session> {
        self.sessions.get(identity)
    }

    pub fn session_mut(&mut self, identity: &str) -> Option<&mut Session> {
        self.sessions.get_mut(identity)
    }

    /// Resolve the caller's session and document in one step, creating
    /// either when missing.
    ///
    /// # Arguments
    ///
    /// * `bus` - Where new documents are exported.
    /// * `identity` - Unique bus name of the caller.
    /// * `path` - Document path as the client spells it.
    /// * `data_path` - Where the current contents live; empty for the file itself.
    /// * `cursor` - The client's cursor position.
    ///
    /// # Returns
    ///
    /// The document's canonical path, or the export failure. A session
    /// created by this call is dropped again if the export fails.
    pub fn ensure_document(
        &mut self,
        bus: &mut dyn Bus,
        identity: &str,
        path: &str,
        data_path: &str,
        cursor: SourceLocation,
    ) -> Result<PathBuf, TransportError> {
        let created = !self.sessions.contains_key(identity);
        let session = session_entry(&mut self.sessions, &mut self.next_id, self.descriptor, identity);
        let result = session.ensure_document(&self.layout, bus, path, data_path, cursor);

        // Don't leave an empty session behind if the very first export failed.
        if result.is_err() && created {
            self.sessions.remove(identity);
        }
        result
    }

    /// Dispose the caller's document at `path`.
    ///
    /// # Arguments
    ///
    /// * `bus` - Where the document's objects are retracted.
    /// * `identity` - Unique bus name of the caller.
    /// * `path` - Document path in any spelling that canonicalizes to it.
    ///
    /// Unknown callers and paths are ignored. Disposing the last document
    /// disposes the session.
    pub fn dispose_document(&mut self, bus: &mut dyn Bus, identity: &str, path: &str) {
        let canonical = self.layout.canonicalize(path);
        let Some(session) = self.sessions.get_mut(identity) else {
            return;
        };

        if session.dispose_document(&self.layout, bus, &canonical) && session.is_empty() {
            self.dispose_session(bus, identity);
        }
    }

    /// Dispose every document of `identity`'s session and drop the session.
    /// Runs the empty hook when this was the last session.
    pub fn dispose_session(&mut self, bus: &mut dyn Bus, identity: &str) {
        let Some(mut session) = self.sessions.remove(identity) else {
            return;
        };

        session.dispose_all(&self.layout, bus);
        log::info!("Session {} for {} disposed", session.id, identity);

        if self.sessions.is_empty() {
            log::info!("No sessions left");
            if let Some(hook) = self.on_empty.as_mut() {
                hook();
            }
        }
    }

    /// Find a document by the object path it is exported at.
    ///
    /// # Returns
    ///
    /// The document from whichever session owns it, or `None`.
    pub fn find_remote(&self, remote_path: &str) -> Option<&Document> {
        self.sessions
            .values()
            .find_map(|session| session.documents().find_remote(remote_path))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn session_entry<'a>(
    sessions: &'a mut HashMap<String, Session>,
    next_id: &mut u64,
    descriptor: &BackendDescriptor,
    identity: &str,
) -> &'a mut Session {
    sessions.entry(identity.to_string()).or_insert_with(|| {
        let id = *next_id;
        *next_id += 1;
        log::info!("Session {} created for {}", id, identity);
        Session::new(id, identity, (descriptor.create)())
    })
}

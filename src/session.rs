//! Per-client sessions.
//!
//! A session owns one backend instance and the documents its client has open.
//! Documents are created on their first parse and exported on the bus right
//! away; they stay addressable until disposed.

use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use crate::backend::{guarded, Backend};
use crate::bus::Bus;
use crate::diagnostics::SourceLocation;
use crate::document::{Document, DocumentId, DocumentLayout, DocumentTable, ProjectDocuments};
use crate::error::{Failure, HandlerError, TransportError};
use crate::options::Options;

pub struct Session {
    pub id: u64,
    /// Bus name of the owning client.
    pub identity: String,
    backend: Box<dyn Backend>,
    documents: DocumentTable,
    next_doc_id: DocumentId,
}

impl Session {
    pub fn new(id: u64, identity: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        Self {
            id,
            identity: identity.into(),
            backend,
            documents: DocumentTable::default(),
            next_doc_id: 0,
        }
    }

    pub fn documents(&self) -> &DocumentTable {
        &self.documents
    }

    pub fn document(&self, path: &Path) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Find or create the document for `path` and refresh its call-scoped
    /// fields. Returns the canonical path.
    ///
    /// A new document is exported on the bus before it is inserted; if the
    /// export fails nothing is recorded.
    pub fn ensure_document(
        &mut self,
        layout: &DocumentLayout,
        bus: &mut dyn Bus,
        path: &str,
        data_path: &str,
        cursor: SourceLocation,
    ) -> Result<PathBuf, TransportError> {
        let canonical = layout.canonicalize(path);

        let doc = match self.documents.entry(canonical.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let id = self.next_doc_id;
                let remote_path = layout.remote_path(self.id, id);
                export_all(bus, &remote_path, layout)?;
                self.next_doc_id += 1;

                log::debug!(
                    "Session {}: exported {} at {}",
                    self.id,
                    canonical.display(),
                    remote_path
                );
                entry.insert(Document::new(
                    id,
                    canonical.clone(),
                    path.to_string(),
                    remote_path,
                ))
            }
        };

        let data_path = if data_path.is_empty() {
            PathBuf::new()
        } else {
            layout.canonicalize(data_path)
        };
        doc.update_for_parse(&data_path, cursor);
        Ok(canonical)
    }

    /// Parse one document. Diagnostics are cleared first and stay cleared if
    /// the backend fails.
    pub fn parse(&mut self, path: &Path, options: &Options) -> Result<(), Failure> {
        let Some(doc) = self.documents.get_mut(path) else {
            return Err(Failure::new(
                "UnknownDocument",
                format!("{} is not open", path.display()),
            ));
        };

        doc.diagnostics.clear();
        let backend = &mut self.backend;
        let outcome = guarded(|| backend.parse(doc, options));
        doc.settle(outcome)
    }

    /// Parse `root` together with `members`. Parse problems raised for the
    /// project as a whole are attached to `root`. Paths the backend reports
    /// outside the project are dropped.
    pub fn parse_project(
        &mut self,
        root: &Path,
        members: &[PathBuf],
        options: &Options,
    ) -> Result<Vec<PathBuf>, Failure> {
        let backend = &mut self.backend;
        let mut project = ProjectDocuments::new(&mut self.documents, root, members);
        for path in std::iter::once(root).chain(members.iter().map(PathBuf::as_path)) {
            if let Some(doc) = project.get_mut(path) {
                doc.diagnostics.clear();
            }
        }

        match guarded(|| backend.parse_project(&mut project, options)) {
            Ok(mut parsed) => {
                parsed.retain(|path| {
                    let known = project.contains(path);
                    if !known {
                        log::warn!("Backend reported {} outside the project", path.display());
                    }
                    known
                });
                Ok(parsed)
            }
            Err(HandlerError::Parse(problems)) => {
                if let Some(doc) = project.get_mut(root) {
                    doc.settle(Err(HandlerError::Parse(problems)))?;
                }
                Ok(vec![root.to_path_buf()])
            }
            Err(HandlerError::Failed(failure)) => Err(failure),
        }
    }

    /// Dispose one document: run the backend hook, retract the object, then
    /// forget it. Returns false if no such document was open.
    pub fn dispose_document(&mut self, layout: &DocumentLayout, bus: &mut dyn Bus, path: &Path) -> bool {
        let Some(doc) = self.documents.get(path) else {
            return false;
        };

        release(self.id, self.backend.as_mut(), layout, bus, doc);
        self.documents.remove(path);
        true
    }

    /// Dispose every document of the session.
    pub fn dispose_all(&mut self, layout: &DocumentLayout, bus: &mut dyn Bus) {
        for doc in self.documents.iter() {
            release(self.id, self.backend.as_mut(), layout, bus, doc);
        }
        self.documents.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn release(
    session: u64,
    backend: &mut dyn Backend,
    layout: &DocumentLayout,
    bus: &mut dyn Bus,
    doc: &Document,
) {
    if let Err(err) = guarded(|| {
        backend.dispose(doc);
        Ok(())
    }) {
        log::warn!("Dispose hook failed for {}: {}", doc.path.display(), err);
    }

    for interface in &layout.interfaces {
        bus.unexport(&doc.remote_path, *interface);
    }
    log::debug!("Session {}: disposed {}", session, doc.path.display());
}

fn export_all(bus: &mut dyn Bus, path: &str, layout: &DocumentLayout) -> Result<(), TransportError> {
    for (index, interface) in layout.interfaces.iter().enumerate() {
        if let Err(err) = bus.export(path, *interface) {
            for exported in &layout.interfaces[..index] {
                bus.unexport(path, *exported);
            }
            return Err(err);
        }
    }
    Ok(())
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("documents", &self.documents)
            .field("next_doc_id", &self.next_doc_id)
            .finish_non_exhaustive()
    }
}

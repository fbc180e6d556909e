//! Server-side document handles.

use std::collections::hash_map::{Entry, HashMap};
use std::path::{Component, Path, PathBuf};

use crate::bus::OBJECT_ROOT;
use crate::capabilities::Interface;
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::error::{Failure, HandlerError};

pub type DocumentId = u64;

/// One open file within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    /// Canonical path; the key in the session's document table.
    pub path: PathBuf,
    /// Path as the client first spelled it.
    pub client_path: String,
    /// Where the current contents live. Differs from `path` while the client
    /// has unsaved edits.
    pub data_path: PathBuf,
    pub cursor: SourceLocation,
    pub diagnostics: Vec<Diagnostic>,
    /// Object path the document's interfaces are exported at.
    pub remote_path: String,
}

impl Document {
    pub fn new(id: DocumentId, path: PathBuf, client_path: String, remote_path: String) -> Self {
        Self {
            id,
            data_path: path.clone(),
            path,
            client_path,
            cursor: SourceLocation::default(),
            diagnostics: Vec::new(),
            remote_path,
        }
    }

    /// Refresh the call-scoped fields. An empty `data_path` means the file on
    /// disk is current.
    pub fn update_for_parse(&mut self, data_path: &Path, cursor: SourceLocation) {
        self.data_path = if data_path.as_os_str().is_empty() {
            self.path.clone()
        } else {
            data_path.to_path_buf()
        };
        self.cursor = cursor;
    }

    /// Record the outcome of a parse attempt.
    ///
    /// Parse problems replace the diagnostics and count as success; other
    /// failures are handed back untouched.
    pub fn settle(&mut self, outcome: Result<(), HandlerError>) -> Result<(), Failure> {
        match outcome {
            Ok(()) => Ok(()),
            Err(HandlerError::Parse(problems)) => {
                log::debug!("{}: {} parse problem(s)", self.path.display(), problems.len());
                self.diagnostics = problems.into_iter().map(Diagnostic::from).collect();
                Ok(())
            }
            Err(HandlerError::Failed(failure)) => Err(failure),
        }
    }
}

/// Documents of one session, keyed by canonical path.
#[derive(Debug, Default)]
pub struct DocumentTable {
    documents: HashMap<PathBuf, Document>,
}

impl DocumentTable {
    pub fn get(&self, path: &Path) -> Option<&Document> {
        self.documents.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Document> {
        self.documents.get_mut(path)
    }

    pub(crate) fn entry(&mut self, path: PathBuf) -> Entry<'_, PathBuf, Document> {
        self.documents.entry(path)
    }

    pub(crate) fn remove(&mut self, path: &Path) -> Option<Document> {
        self.documents.remove(path)
    }

    pub fn find_remote(&self, remote_path: &str) -> Option<&Document> {
        self.documents
            .values()
            .find(|doc| doc.remote_path == remote_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub(crate) fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// The part of a session's documents a project parse may touch: the root
/// and the members named in the call.
///
/// Documents can be updated through the view but never added or removed, so
/// everything a backend sees stays exported on the bus.
pub struct ProjectDocuments<'a> {
    table: &'a mut DocumentTable,
    root: &'a Path,
    members: &'a [PathBuf],
}

impl<'a> ProjectDocuments<'a> {
    pub(crate) fn new(table: &'a mut DocumentTable, root: &'a Path, members: &'a [PathBuf]) -> Self {
        Self {
            table,
            root,
            members,
        }
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Member paths in the order the client listed them. May repeat paths
    /// and may include the root.
    pub fn members(&self) -> &[PathBuf] {
        self.members
    }

    pub fn contains(&self, path: &Path) -> bool {
        path == self.root || self.members.iter().any(|m| m == path)
    }

    pub fn get(&self, path: &Path) -> Option<&Document> {
        if self.contains(path) {
            self.table.get(path)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Document> {
        if self.contains(path) {
            self.table.get_mut(path)
        } else {
            None
        }
    }
}

/// Naming and export rules shared by every document of a service.
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    pub language: &'static str,
    /// Interfaces exported on each document handle.
    pub interfaces: Vec<Interface>,
    /// Directory relative client paths are resolved against.
    pub base_dir: PathBuf,
}

impl DocumentLayout {
    pub fn service_path(&self) -> String {
        format!("{OBJECT_ROOT}/{}", self.language)
    }

    /// Placeholder object exported for introspection.
    pub fn placeholder_path(&self) -> String {
        format!("{}/document", self.service_path())
    }

    pub fn remote_path(&self, session: u64, document: DocumentId) -> String {
        format!("{}/{session}/documents/{document}", self.service_path())
    }

    pub fn canonicalize(&self, path: &str) -> PathBuf {
        canonicalize(path, &self.base_dir)
    }
}

/// Lexically normalize `path` into an absolute path.
///
/// Relative paths are resolved against `base`; `.` and `..` segments and
/// repeated separators are removed. The filesystem is not consulted, so
/// documents that only exist in the client's buffer still get a stable key.
pub fn canonicalize(path: &str, base: &Path) -> PathBuf {
    let path = Path::new(path);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

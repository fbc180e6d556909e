//! Capability negotiation.
//!
//! Backends declare which optional contracts they implement in a static
//! [`BackendDescriptor`]. Negotiation turns that table into the exact set of
//! remote interfaces exported at the service path and on every document
//! handle. An interface that is not negotiated is never exported, so its
//! methods are unreachable rather than stubbed out.

use crate::backend::BackendDescriptor;

/// Remote interfaces a service or document object can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Interface {
    Service,
    Project,
    Document,
    Diagnostics,
}

impl Interface {
    pub const ALL: [Interface; 4] = [
        Interface::Service,
        Interface::Project,
        Interface::Document,
        Interface::Diagnostics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Interface::Service => "org.gnome.CodeAssist.v1.Service",
            Interface::Project => "org.gnome.CodeAssist.v1.Project",
            Interface::Document => "org.gnome.CodeAssist.v1.Document",
            Interface::Diagnostics => "org.gnome.CodeAssist.v1.Diagnostics",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.name() == name)
    }
}

/// Optional contracts a backend may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Documents carry diagnostics.
    Diagnostics,
    /// The backend can parse a set of documents as one project.
    Project,
}

/// Interfaces to export for one backend. Computed once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub service: Vec<Interface>,
    pub document: Vec<Interface>,
}

impl Negotiated {
    pub fn supports(&self, interface: Interface) -> bool {
        self.service.contains(&interface) || self.document.contains(&interface)
    }
}

pub fn negotiate(descriptor: &BackendDescriptor) -> Negotiated {
    let declared = |capability| descriptor.capabilities.contains(&capability);

    let mut service = vec![Interface::Service];
    let mut document = vec![Interface::Document];

    if declared(Capability::Diagnostics) {
        document.push(Interface::Diagnostics);
    }

    // Project results are reported through document diagnostics.
    if declared(Capability::Project) {
        if declared(Capability::Diagnostics) {
            service.push(Interface::Project);
        } else {
            log::warn!(
                "{} backend declares project mode without diagnostics; ignoring it",
                descriptor.language
            );
        }
    }

    Negotiated { service, document }
}

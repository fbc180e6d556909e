//! Message bus primitives consumed by the service core.
//!
//! The core only needs three things from the bus: the identity of whoever
//! made a call, the ability to export and retract objects at a path, and a
//! stream of "owner of name X changed" notifications. Calls and
//! notifications arrive as [`Event`]s on a single queue.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::capabilities::Interface;
use crate::error::{Fault, TransportError};
use crate::reaper::NameOwnerChanged;

/// Prefix of every interface and error name the service uses.
pub const BUS_NAME_PREFIX: &str = "org.gnome.CodeAssist.v1";

/// Root under which every service object lives.
pub const OBJECT_ROOT: &str = "/org/gnome/CodeAssist/v1";

/// An inbound method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Unique bus name of the caller.
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(
        sender: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

/// Result of a call: the reply body, or a fault.
pub type Reply = Result<Vec<Value>, Fault>;

#[derive(Debug)]
pub enum Event {
    Call {
        call: Call,
        reply: oneshot::Sender<Reply>,
    },
    NameOwnerChanged(NameOwnerChanged),
}

/// Object export primitives.
pub trait Bus {
    fn export(&mut self, path: &str, interface: Interface) -> Result<(), TransportError>;

    fn unexport(&mut self, path: &str, interface: Interface);

    /// Interfaces currently reachable at `path`.
    fn interfaces(&self, path: &str) -> Vec<Interface>;

    fn is_exported(&self, path: &str, interface: Interface) -> bool {
        self.interfaces(path).contains(&interface)
    }
}

/// In-process table of exported objects.
#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: BTreeMap<String, BTreeSet<Interface>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Bus for ObjectTable {
    fn export(&mut self, path: &str, interface: Interface) -> Result<(), TransportError> {
        if !crate::signature::is_object_path(path) {
            return Err(TransportError::Export {
                path: path.to_string(),
                interface: interface.name().to_string(),
                reason: "invalid object path".to_string(),
            });
        }
        self.objects
            .entry(path.to_string())
            .or_default()
            .insert(interface);
        Ok(())
    }

    fn unexport(&mut self, path: &str, interface: Interface) {
        if let Some(interfaces) = self.objects.get_mut(path) {
            interfaces.remove(&interface);
            if interfaces.is_empty() {
                self.objects.remove(path);
            }
        }
    }

    fn interfaces(&self, path: &str) -> Vec<Interface> {
        self.objects
            .get(path)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

//! Ownership-change handling.
//!
//! The bus announces `NameOwnerChanged(name, old_owner, new_owner)` whenever
//! a name changes hands. A client disconnecting shows up as its unique name
//! losing its owner; everything the client had open is then torn down.

use crate::bus::Bus;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOwnerChanged {
    pub name: String,
    pub old_owner: String,
    pub new_owner: String,
}

impl NameOwnerChanged {
    /// Notification for a client whose unique name has gone away.
    pub fn vanished(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            old_owner: name.clone(),
            name,
            new_owner: String::new(),
        }
    }

    /// The identity that lost ownership, if this change is a disappearance.
    pub fn lost_identity(&self) -> Option<&str> {
        if self.new_owner.is_empty() && !self.old_owner.is_empty() {
            Some(&self.old_owner)
        } else {
            None
        }
    }
}

/// Dispose the session of a vanished client. Returns true if a session was
/// torn down.
pub fn reap(registry: &mut SessionRegistry, bus: &mut dyn Bus, change: &NameOwnerChanged) -> bool {
    let Some(identity) = change.lost_identity() else {
        return false;
    };
    if !registry.contains(identity) {
        return false;
    }

    log::info!("{} left the bus", identity);
    registry.dispose_session(bus, identity);
    true
}

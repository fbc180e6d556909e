//! The service: negotiated capabilities, session registry and the event loop.
//!
//! All state is owned by one [`Server`] driven by a single task. Calls and
//! ownership notifications are handled strictly in the order they arrive,
//! each one running to completion before the next is looked at. A slow
//! backend therefore stalls every client; that is accepted.

use std::io;
use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::backend::BackendDescriptor;
use crate::bus::{Bus, Event};
use crate::capabilities::negotiate;
use crate::document::DocumentLayout;
use crate::error::TransportError;
use crate::reaper::{self, NameOwnerChanged};
use crate::registry::SessionRegistry;

/// Process-level configuration of the service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory relative client paths are resolved against.
    pub base_dir: PathBuf,
}

impl ServerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn from_current_dir() -> io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }
}

pub struct Server {
    pub(crate) descriptor: &'static BackendDescriptor,
    pub(crate) registry: SessionRegistry,
    pub(crate) bus: Box<dyn Bus>,
}

impl Server {
    /// Negotiate capabilities and export the service object.
    pub fn new(
        descriptor: &'static BackendDescriptor,
        mut bus: Box<dyn Bus>,
        config: ServerConfig,
    ) -> Result<Self, TransportError> {
        let negotiated = negotiate(descriptor);
        let layout = DocumentLayout {
            language: descriptor.language,
            interfaces: negotiated.document.clone(),
            base_dir: config.base_dir,
        };

        let service_path = layout.service_path();
        for interface in &negotiated.service {
            bus.export(&service_path, *interface)?;
        }

        // Lets clients introspect document interfaces before opening anything.
        let placeholder = layout.placeholder_path();
        for interface in &negotiated.document {
            bus.export(&placeholder, *interface)?;
        }

        log::info!(
            "{} service exported at {} ({:?})",
            descriptor.language,
            service_path,
            negotiated
        );

        Ok(Self {
            descriptor,
            registry: SessionRegistry::new(descriptor, layout),
            bus,
        })
    }

    pub fn language(&self) -> &'static str {
        self.descriptor.language
    }

    pub fn service_path(&self) -> String {
        self.registry.layout().service_path()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &dyn Bus {
        self.bus.as_ref()
    }

    /// Run `hook` whenever the last client session is gone.
    pub fn on_empty(&mut self, hook: impl FnMut() + 'static) {
        self.registry.on_empty(hook);
    }

    /// Process events until the queue closes.
    pub async fn run(&mut self, mut events: UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        log::debug!("Event queue closed");
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Call { call, reply } => {
                let result = self.dispatch(call);
                if reply.send(result).is_err() {
                    log::debug!("Caller went away before the reply was sent");
                }
            }
            Event::NameOwnerChanged(change) => {
                self.owner_changed(&change);
            }
        }
    }

    /// Tear down the session of a client that left the bus.
    pub fn owner_changed(&mut self, change: &NameOwnerChanged) -> bool {
        reaper::reap(&mut self.registry, self.bus.as_mut(), change)
    }
}

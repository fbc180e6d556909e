//! Code assistance service core.
//!
//! Language backends are exposed to editor clients as objects on a message
//! bus. Each client gets its own session of open documents; documents carry
//! the diagnostics produced by the last parse and disappear when the client
//! disposes them or leaves the bus.

pub mod backend;
pub mod bus;
pub mod capabilities;
pub mod diagnostics;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod languages;
pub mod options;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;
pub mod signature;
pub mod transport;

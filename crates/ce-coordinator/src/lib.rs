//! ce-coordinator: central request coordinator for ConsultEase
//!
//! The coordinator owns the authoritative request registry, routes requests
//! to faculty terminals over the bus, times out requests nobody answers, and
//! mirrors each terminal's reported presence to gate routing.

pub mod coordinator;
pub mod demo;
pub mod ipc;
pub mod presence;
pub mod registry;

pub use coordinator::Coordinator;
pub use presence::PresenceMirror;
pub use registry::MemoryRegistry;

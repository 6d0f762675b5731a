//! Collaborator trait definitions

mod collaborators;
mod registry;

pub use collaborators::{CoordinatorListener, NoopListener, RequestDisplay};
pub use registry::RequestRegistry;

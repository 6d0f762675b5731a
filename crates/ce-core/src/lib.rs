//! ce-core: Core abstractions and configuration for ConsultEase
//!
//! This crate provides the pieces shared by the coordinator and the
//! terminals: configuration, error types, the consultation-request state
//! machine, the reconnecting bus client, and the collaborator traits the
//! core calls out to.

pub mod bus;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod time;
pub mod timers;
pub mod traits;
pub mod types;

pub use error::CeError;
pub use types::{ConnectionStatus, FacultyIdentity};

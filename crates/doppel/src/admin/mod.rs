//! The management plane: HTTP API owning imposter lifetime.

pub mod guard;
pub mod handlers;
pub mod router;
pub mod server;
pub mod types;

pub use guard::AccessPolicy;
pub use server::{ManagementServer, ServerOptions};

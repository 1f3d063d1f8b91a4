//! Imposters: virtual services and their lifecycle.

pub mod core;
pub mod registry;
pub mod stubs;
pub mod types;


pub use core::Imposter;
pub use registry::ImposterRegistry;
pub use stubs::{StubMatch, StubRepository};
pub use types::{ImposterConfig, Predicate, ResponseConfig, Stub};

//! doppel: a service virtualization engine.
//!
//! A long-running process hosting "imposters": virtual network services
//! that listen on configurable ports and answer real client traffic with
//! scripted responses. The management API owns imposter lifetime; the
//! engine matches requests against stub predicates, resolves the next
//! response and runs its behavior pipeline.

pub mod admin;
pub mod behaviors;
pub mod config;
pub mod errors;
pub mod imposter;
pub mod logging;
pub mod model;
pub mod predicate;
pub mod protocols;
pub mod scripting;
pub mod store;

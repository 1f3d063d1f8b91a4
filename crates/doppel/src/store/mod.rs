//! Pluggable imposter persistence.
//!
//! Three implementations: no-op (the default), one JSON file per port under
//! a data directory, and a user-supplied JavaScript module for custom
//! stores.

mod filesystem;
mod scripted;

pub use filesystem::FileSystemDataStore;
pub use scripted::ScriptedDataStore;

use crate::errors::EngineError;
use crate::imposter::core::Imposter;
use crate::imposter::types::ImposterConfig;

/// Persistence operations a store must provide. Implementations are shared
/// across handlers and must be safe for concurrent use.
pub trait DataStore: Send + Sync {
    /// All persisted configs, for startup reload.
    fn load(&self) -> Result<Vec<ImposterConfig>, EngineError>;
    fn save(&self, imposter: &Imposter) -> Result<(), EngineError>;
    fn delete(&self, port: u16) -> Result<(), EngineError>;
    fn delete_all(&self) -> Result<(), EngineError>;
}

/// Store used when persistence is not configured.
pub struct NoOpDataStore;

impl DataStore for NoOpDataStore {
    fn load(&self) -> Result<Vec<ImposterConfig>, EngineError> {
        Ok(Vec::new())
    }

    fn save(&self, _imposter: &Imposter) -> Result<(), EngineError> {
        Ok(())
    }

    fn delete(&self, _port: u16) -> Result<(), EngineError> {
        Ok(())
    }

    fn delete_all(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

//! The process-wide imposter registry: `port -> Imposter`.
//!
//! Create validates the config, binds the listener (learning the final port
//! when the OS assigns one), builds the imposter, starts the accept loop
//! and records the live object. Delete closes the listener synchronously
//! before dropping the map entry. Every mutation is mirrored to the data
//! store; store write failures are logged and in-memory state wins.

use crate::errors::EngineError;
use crate::imposter::core::Imposter;
use crate::imposter::types::{ImposterConfig, Stub};
use crate::protocols;
use crate::store::DataStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ImposterRegistry {
    imposters: RwLock<HashMap<u16, Arc<Imposter>>>,
    store: Arc<dyn DataStore>,
    allow_injection: bool,
}

impl ImposterRegistry {
    pub fn new(store: Arc<dyn DataStore>, allow_injection: bool) -> Arc<Self> {
        Arc::new(ImposterRegistry {
            imposters: RwLock::new(HashMap::new()),
            store,
            allow_injection,
        })
    }

    pub fn allows_injection(&self) -> bool {
        self.allow_injection
    }

    /// Create an imposter from config: validate, bind, start, record.
    pub async fn create(
        self: &Arc<Self>,
        mut config: ImposterConfig,
    ) -> Result<Arc<Imposter>, EngineError> {
        validate_config(&config)?;

        if let Some(port) = config.port {
            if port != 0 && self.imposters.read().contains_key(&port) {
                return Err(EngineError::Validation(format!(
                    "port {port} is already in use"
                )));
            }
        }

        let (port, listener) = protocols::bind(&config).await?;
        config.port = Some(port);

        let imposter = Arc::new(Imposter::new(config, self.allow_injection));
        let handle = protocols::serve(listener, Arc::clone(&imposter));
        imposter.set_close_handle(handle);

        {
            let mut imposters = self.imposters.write();
            if imposters.contains_key(&port) {
                imposter.stop();
                return Err(EngineError::Validation(format!(
                    "port {port} is already in use"
                )));
            }
            imposters.insert(port, Arc::clone(&imposter));
        }

        let store = Arc::clone(&self.store);
        imposter.set_on_update(Arc::new(move |imposter: &Imposter| {
            if let Err(e) = store.save(imposter) {
                error!("failed to persist imposter on port {}: {e}", imposter.port());
            }
        }));
        self.save(&imposter);

        info!(
            "created {} imposter on port {}",
            imposter.protocol(),
            port
        );
        Ok(imposter)
    }

    pub fn get(&self, port: u16) -> Result<Arc<Imposter>, EngineError> {
        self.imposters
            .read()
            .get(&port)
            .cloned()
            .ok_or_else(|| EngineError::MissingResource(format!("no imposter on port {port}")))
    }

    /// Stop and remove an imposter. Stop errors never prevent removal.
    pub fn delete(&self, port: u16) -> Result<Arc<Imposter>, EngineError> {
        let imposter = {
            let mut imposters = self.imposters.write();
            imposters
                .remove(&port)
                .ok_or_else(|| EngineError::MissingResource(format!("no imposter on port {port}")))?
        };
        imposter.stop();
        if let Err(e) = self.store.delete(port) {
            error!("failed to delete persisted imposter on port {port}: {e}");
        }
        info!("deleted imposter on port {port}");
        Ok(imposter)
    }

    /// Stop and remove every imposter, returning them in port order.
    pub fn delete_all(&self) -> Vec<Arc<Imposter>> {
        let drained: Vec<Arc<Imposter>> = {
            let mut imposters = self.imposters.write();
            imposters.drain().map(|(_, imposter)| imposter).collect()
        };
        for imposter in &drained {
            imposter.stop();
        }
        if let Err(e) = self.store.delete_all() {
            error!("failed to clear persisted imposters: {e}");
        }
        info!("deleted all imposters");
        let mut sorted = drained;
        sorted.sort_by_key(|imposter| imposter.port());
        sorted
    }

    /// Snapshot for the management plane, in port order.
    pub fn get_all(&self) -> Vec<Arc<Imposter>> {
        let mut imposters: Vec<Arc<Imposter>> =
            self.imposters.read().values().cloned().collect();
        imposters.sort_by_key(|imposter| imposter.port());
        imposters
    }

    /// Mirror an imposter to the data store. Failures are logged; memory
    /// wins.
    pub fn save(&self, imposter: &Imposter) {
        if let Err(e) = self.store.save(imposter) {
            error!("failed to persist imposter on port {}: {e}", imposter.port());
        }
    }

    /// Re-instantiate every imposter the store knows about. Bad records are
    /// logged and skipped.
    pub async fn load_from_store(self: &Arc<Self>) {
        let configs = match self.store.load() {
            Ok(configs) => configs,
            Err(e) => {
                error!("failed to load persisted imposters: {e}");
                return;
            }
        };
        for config in configs {
            let port = config.port;
            if let Err(e) = self.create(config).await {
                warn!("skipping persisted imposter on port {port:?}: {e}");
            }
        }
    }
}

/// Structural validation applied before anything binds.
fn validate_config(config: &ImposterConfig) -> Result<(), EngineError> {
    match config.protocol.as_str() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::CannotStartServer(format!(
                "unsupported protocol: {other}"
            )))
        }
    }
    for stub in &config.stubs {
        validate_stub(stub)?;
    }
    Ok(())
}

/// Shared with the stub management handlers.
pub fn validate_stub(stub: &Stub) -> Result<(), EngineError> {
    if stub.responses.is_empty() {
        return Err(EngineError::Validation(
            "'responses' must be a non-empty array".to_string(),
        ));
    }
    for response in &stub.responses {
        response.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NoOpDataStore;
    use serde_json::json;

    fn registry() -> Arc<ImposterRegistry> {
        ImposterRegistry::new(Arc::new(NoOpDataStore), true)
    }

    fn config(value: serde_json::Value) -> ImposterConfig {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_port_when_unset() {
        let registry = registry();
        let imposter = registry
            .create(config(json!({"protocol": "http", "host": "127.0.0.1"})))
            .await
            .unwrap();
        assert!(imposter.port() > 0);
        registry.delete(imposter.port()).unwrap();
    }

    #[tokio::test]
    async fn test_port_uniqueness() {
        let registry = registry();
        let first = registry
            .create(config(json!({"protocol": "http", "host": "127.0.0.1"})))
            .await
            .unwrap();
        let port = first.port();

        let err = registry
            .create(config(
                json!({"protocol": "http", "host": "127.0.0.1", "port": port}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // After delete the port is reusable.
        registry.delete(port).unwrap();
        let again = registry
            .create(config(
                json!({"protocol": "http", "host": "127.0.0.1", "port": port}),
            ))
            .await
            .unwrap();
        assert_eq!(again.port(), port);
        registry.delete(port).unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_missing_resource() {
        let registry = registry();
        assert!(matches!(
            registry.get(1),
            Err(EngineError::MissingResource(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_twice_second_is_missing() {
        let registry = registry();
        let imposter = registry
            .create(config(json!({"protocol": "http", "host": "127.0.0.1"})))
            .await
            .unwrap();
        let port = imposter.port();
        assert!(registry.delete(port).is_ok());
        assert!(matches!(
            registry.delete(port),
            Err(EngineError::MissingResource(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_all_returns_stopped_imposters() {
        let registry = registry();
        for _ in 0..3 {
            registry
                .create(config(json!({"protocol": "http", "host": "127.0.0.1"})))
                .await
                .unwrap();
        }
        let deleted = registry.delete_all();
        assert_eq!(deleted.len(), 3);
        assert!(registry.get_all().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_protocol_rejected() {
        let registry = registry();
        let err = registry
            .create(config(json!({"protocol": "smtp"})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CannotStartServer(_)));
    }

    #[tokio::test]
    async fn test_stub_without_responses_rejected() {
        let registry = registry();
        let err = registry
            .create(config(json!({
                "protocol": "http",
                "host": "127.0.0.1",
                "stubs": [{"predicates": []}]
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}

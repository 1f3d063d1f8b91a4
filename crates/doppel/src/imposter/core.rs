//! The imposter: one virtual service bound to a port.
//!
//! Composes the stub repository, predicate evaluator, behavior pipeline and
//! script bridge behind a single entry point, [`Imposter::get_response_for`].
//! The listener close handle is wired in by the registry after construction,
//! which is what breaks the imposter/listener construction cycle.

use crate::behaviors::BehaviorExecutor;
use crate::errors::EngineError;
use crate::imposter::stubs::StubRepository;
use crate::imposter::types::{Encoding, ImposterConfig, ResponseKind, Stub};
use crate::model::{Request, Response};
use crate::predicate::PredicateEvaluator;
use crate::protocols::CloseHandle;
use crate::scripting::{MiddlewareOutcome, ScriptBridge};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Hook invoked after any mutation so on-disk state tracks memory.
pub type UpdateHook = Arc<dyn Fn(&Imposter) + Send + Sync>;

pub struct Imposter {
    config: ImposterConfig,
    pub stubs: StubRepository,
    bridge: ScriptBridge,
    encoding: Encoding,
    /// Scratch state shared with user scripts, guarded for the duration of
    /// each evaluation.
    state: Mutex<Map<String, Value>>,
    request_count: AtomicU64,
    close: Mutex<Option<CloseHandle>>,
    on_update: RwLock<Option<UpdateHook>>,
}

impl std::fmt::Debug for Imposter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Imposter")
            .field("config", &self.config)
            .field("request_count", &self.request_count)
            .finish_non_exhaustive()
    }
}

impl Imposter {
    pub fn new(config: ImposterConfig, allow_injection: bool) -> Self {
        let stubs = StubRepository::new(config.stubs.clone());
        let encoding = config.encoding();
        Imposter {
            config,
            stubs,
            bridge: ScriptBridge::new(allow_injection),
            encoding,
            state: Mutex::new(Map::new()),
            request_count: AtomicU64::new(0),
            close: Mutex::new(None),
            on_update: RwLock::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.config.port.unwrap_or(0)
    }

    pub fn protocol(&self) -> &str {
        &self.config.protocol
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn records_requests(&self) -> bool {
        self.config.record_requests
    }

    pub fn allows_cors(&self) -> bool {
        self.config.allow_cors
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn set_close_handle(&self, handle: CloseHandle) {
        *self.close.lock() = Some(handle);
    }

    pub fn set_on_update(&self, hook: UpdateHook) {
        *self.on_update.write() = Some(hook);
    }

    /// Stop the listener. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(handle) = self.close.lock().take() {
            handle.close();
        }
    }

    fn notify_update(&self) {
        let hook = self.on_update.read().clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Generate the response for a request. This is the whole engine:
    /// counter, recording, middleware, stub scan, resolution, behaviors.
    pub async fn get_response_for(&self, request: &mut Request) -> Result<Response, EngineError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        if self.config.record_requests {
            self.stubs.add_request(request.clone());
        }

        if let Some(middleware) = &self.config.middleware {
            match self.run_middleware(middleware, request) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }

        let matched = {
            let evaluator = PredicateEvaluator::new(self.encoding, &self.bridge);
            self.stubs.first(|predicates| {
                let mut state = self.state.lock();
                predicates
                    .iter()
                    .all(|p| evaluator.evaluate(p, request, &mut state))
            })
        };

        if !matched.success {
            return Ok(self
                .config
                .default_response
                .clone()
                .unwrap_or_else(|| Response::with_status(200)));
        }

        let config = self.stubs.next_response(matched.index);
        let response = match config.kind() {
            ResponseKind::Is(template) => template.clone(),
            ResponseKind::Inject(source) => {
                let mut state = self.state.lock();
                self.bridge.evaluate_inject(source, request, &mut state)?
            }
            ResponseKind::Proxy(proxy) => {
                // TODO: forward to proxy.to and record the answer.
                warn!("proxy responses are not implemented; answering with a placeholder");
                Response {
                    status_code: 200,
                    body: Value::String(format!("proxy to {} not implemented", proxy.to)),
                    ..Default::default()
                }
            }
            ResponseKind::Fault(fault) => {
                // TODO: drive the fault down to the connection.
                warn!("fault responses are not implemented; answering with a placeholder");
                Response {
                    status_code: 500,
                    body: Value::String(format!("fault {} not implemented", fault.fault)),
                    ..Default::default()
                }
            }
            ResponseKind::Empty => Response::with_status(200),
        };

        if config.behaviors.is_empty() {
            return Ok(response);
        }
        let executor = BehaviorExecutor::new(&self.bridge);
        executor
            .execute(request, response, &config.behaviors, &self.state)
            .await
    }

    /// Returns `Some(response)` when the middleware short-circuits. Script
    /// runtime errors are logged and matching continues with the original
    /// request; the injection gate is a hard error.
    fn run_middleware(
        &self,
        source: &str,
        request: &mut Request,
    ) -> Result<Option<Response>, EngineError> {
        let mut state = self.state.lock();
        match self.bridge.evaluate_middleware(source, request, &mut state) {
            Ok(MiddlewareOutcome::ShortCircuit(response)) => Ok(Some(response)),
            Ok(MiddlewareOutcome::Continue(updated)) => {
                *request = updated;
                Ok(None)
            }
            Err(e @ EngineError::InvalidInjection(_)) => Err(e),
            Err(e) => {
                error!("middleware failed: {e}");
                Ok(None)
            }
        }
    }

    // ----- management-plane mutations; each re-persists via the hook -----

    pub fn add_stub(&self, stub: Stub, index: Option<usize>) {
        match index {
            Some(i) => self.stubs.insert_at_index(stub, i),
            None => self.stubs.add(stub),
        }
        self.notify_update();
    }

    pub fn replace_stub(&self, stub: Stub, index: usize) -> Result<(), EngineError> {
        self.stubs.replace_at_index(stub, index)?;
        self.notify_update();
        Ok(())
    }

    pub fn delete_stub(&self, index: usize) -> Result<(), EngineError> {
        self.stubs.delete_at_index(index)?;
        self.notify_update();
        Ok(())
    }

    pub fn replace_all_stubs(&self, stubs: Vec<Stub>) {
        self.stubs.replace_all(stubs);
        self.notify_update();
    }

    /// Clear the request log and reset the counter.
    pub fn reset_requests(&self) {
        self.stubs.delete_saved_requests();
        self.request_count.store(0, Ordering::SeqCst);
        self.notify_update();
    }

    pub fn delete_saved_proxy_responses(&self) {
        self.stubs.delete_saved_proxy_responses();
        self.notify_update();
    }

    /// Replayable snapshot of this imposter: the original config with the
    /// live stub list. This is what the data store persists.
    pub fn to_config(&self) -> ImposterConfig {
        let mut config = self.config.clone();
        config.stubs = self.stubs.get_all();
        config
    }
}

//! The behavior pipeline: ordered transforms applied to a resolved response.
//!
//! Behaviors run left-to-right in declared order; each takes the response
//! and yields a response. `wait` suspends only the handling task. `decorate`
//! and `shellTransform` are script features and refuse to run with injection
//! disabled; a decorator that fails at runtime is logged and leaves the
//! response unchanged.

mod copy;
mod extraction;
mod lookup;
mod shell;

pub use copy::{apply_copy, replace_token};
pub use extraction::apply_selector;
pub use lookup::apply_lookup;
pub use shell::apply_shell_transform;

use crate::errors::EngineError;
use crate::imposter::types::Behavior;
use crate::model::{Request, Response};
use crate::scripting::ScriptBridge;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::error;

/// Runs behavior lists for one imposter.
pub struct BehaviorExecutor<'a> {
    bridge: &'a ScriptBridge,
}

impl<'a> BehaviorExecutor<'a> {
    pub fn new(bridge: &'a ScriptBridge) -> Self {
        BehaviorExecutor { bridge }
    }

    /// The state mutex is taken only around script evaluation, never across
    /// a wait, so latency behaviors do not serialize unrelated requests.
    pub async fn execute(
        &self,
        request: &Request,
        mut response: Response,
        behaviors: &[Behavior],
        state: &Mutex<Map<String, Value>>,
    ) -> Result<Response, EngineError> {
        for behavior in behaviors {
            if let Some(wait) = &behavior.wait {
                if wait.milliseconds > 0 {
                    tokio::time::sleep(Duration::from_millis(wait.milliseconds)).await;
                }
            }
            if let Some(copies) = &behavior.copy {
                apply_copy(request, &mut response, copies);
            }
            if let Some(source) = &behavior.decorate {
                let result = {
                    let mut state = state.lock();
                    self.bridge
                        .evaluate_decorate(source, request, &response, &mut state)
                };
                match result {
                    Ok(decorated) => response = decorated,
                    Err(e @ EngineError::InvalidInjection(_)) => return Err(e),
                    Err(e) => error!("decorate behavior failed: {e}"),
                }
            }
            if let Some(command) = &behavior.shell_transform {
                if !self.bridge.allows_injection() {
                    return Err(EngineError::invalid_injection());
                }
                response = apply_shell_transform(command, request, &response)?;
            }
            if let Some(lookup) = &behavior.lookup {
                apply_lookup(request, &mut response, lookup);
            }
        }
        Ok(response)
    }
}

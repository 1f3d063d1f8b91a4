//! Per-imposter stub repository: ordered stubs, the recorded-request log,
//! and response rotation state.
//!
//! Rotation is strictly cyclic per stub. Each stub carries a cursor; a
//! response config with `repeat: n` holds the cursor for n successive calls
//! before it advances with wrap-around. Cursors travel with their stub, so
//! inserting or deleting neighbours does not disturb them.

use crate::errors::EngineError;
use crate::imposter::types::{Predicate, ResponseConfig, Stub};
use crate::model::Request;
use parking_lot::RwLock;

#[derive(Default)]
struct Rotation {
    index: usize,
    repeat_count: u32,
}

struct StubEntry {
    stub: Stub,
    rotation: Rotation,
}

impl StubEntry {
    fn new(stub: Stub) -> Self {
        StubEntry {
            stub,
            rotation: Rotation::default(),
        }
    }
}

#[derive(Default)]
struct Inner {
    stubs: Vec<StubEntry>,
    requests: Vec<Request>,
}

/// Result of a stub search. `success: false` is a normal outcome, never an
/// error.
pub struct StubMatch {
    pub success: bool,
    pub index: usize,
}

/// Ordered stubs plus the request log, all under one lock.
pub struct StubRepository {
    inner: RwLock<Inner>,
}

impl StubRepository {
    pub fn new(stubs: Vec<Stub>) -> Self {
        StubRepository {
            inner: RwLock::new(Inner {
                stubs: stubs.into_iter().map(StubEntry::new).collect(),
                requests: Vec::new(),
            }),
        }
    }

    /// Find the first stub whose predicates pass the filter. Stubs are
    /// scanned in declared order, so the smallest matching index wins.
    pub fn first<F>(&self, filter: F) -> StubMatch
    where
        F: Fn(&[Predicate]) -> bool,
    {
        let inner = self.inner.read();
        for (index, entry) in inner.stubs.iter().enumerate() {
            if filter(&entry.stub.predicates) {
                return StubMatch {
                    success: true,
                    index,
                };
            }
        }
        StubMatch {
            success: false,
            index: 0,
        }
    }

    /// The next response config for the stub at `index`, advancing the
    /// rotation cursor according to the current config's repeat count.
    pub fn next_response(&self, index: usize) -> ResponseConfig {
        let mut inner = self.inner.write();
        let Some(entry) = inner.stubs.get_mut(index) else {
            return ResponseConfig::default();
        };
        let count = entry.stub.responses.len();
        if count == 0 {
            return ResponseConfig::default();
        }

        let current = entry.rotation.index % count;
        let config = entry.stub.responses[current].clone();

        entry.rotation.repeat_count += 1;
        if entry.rotation.repeat_count >= config.repeat_count() {
            entry.rotation.repeat_count = 0;
            entry.rotation.index = (current + 1) % count;
        }
        config
    }

    pub fn add(&self, stub: Stub) {
        self.inner.write().stubs.push(StubEntry::new(stub));
    }

    /// Insert before `index`; indexes past the end append.
    pub fn insert_at_index(&self, stub: Stub, index: usize) {
        let mut inner = self.inner.write();
        let index = index.min(inner.stubs.len());
        inner.stubs.insert(index, StubEntry::new(stub));
    }

    pub fn delete_at_index(&self, index: usize) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if index >= inner.stubs.len() {
            return Err(EngineError::Validation(format!(
                "stub index {index} is out of bounds"
            )));
        }
        inner.stubs.remove(index);
        Ok(())
    }

    pub fn replace_at_index(&self, stub: Stub, index: usize) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if index >= inner.stubs.len() {
            return Err(EngineError::Validation(format!(
                "stub index {index} is out of bounds"
            )));
        }
        inner.stubs[index] = StubEntry::new(stub);
        Ok(())
    }

    pub fn replace_all(&self, stubs: Vec<Stub>) {
        let mut inner = self.inner.write();
        inner.stubs = stubs.into_iter().map(StubEntry::new).collect();
    }

    pub fn get_all(&self) -> Vec<Stub> {
        self.inner
            .read()
            .stubs
            .iter()
            .map(|entry| entry.stub.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().stubs.len()
    }

    /// Append to the request log. Entries arrive in acceptance order and are
    /// only removed by an explicit reset.
    pub fn add_request(&self, request: Request) {
        self.inner.write().requests.push(request);
    }

    pub fn load_requests(&self) -> Vec<Request> {
        self.inner.read().requests.clone()
    }

    pub fn delete_saved_requests(&self) {
        self.inner.write().requests.clear();
    }

    /// Drop only stubs recorded by a proxy.
    pub fn delete_saved_proxy_responses(&self) {
        self.inner.write().stubs.retain(|entry| !entry.stub.is_proxy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stub(bodies: &[&str]) -> Stub {
        let responses: Vec<serde_json::Value> = bodies
            .iter()
            .map(|b| json!({"is": {"statusCode": 200, "body": b}}))
            .collect();
        serde_json::from_value(json!({"responses": responses})).unwrap()
    }

    fn body_of(config: &ResponseConfig) -> String {
        config.is.as_ref().unwrap().body.as_str().unwrap().to_string()
    }

    #[test]
    fn test_rotation_cycles_in_order() {
        let repo = StubRepository::new(vec![stub(&["a", "b", "c"])]);
        let seen: Vec<String> = (0..7).map(|_| body_of(&repo.next_response(0))).collect();
        assert_eq!(seen, ["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn test_rotation_law_mod_r() {
        let repo = StubRepository::new(vec![stub(&["r0", "r1", "r2", "r3"])]);
        for i in 0..12 {
            let config = repo.next_response(0);
            assert_eq!(body_of(&config), format!("r{}", i % 4));
        }
    }

    #[test]
    fn test_repeat_holds_cursor() {
        let s: Stub = serde_json::from_value(json!({
            "responses": [
                {"is": {"body": "x"}, "repeat": 3},
                {"is": {"body": "y"}}
            ]
        }))
        .unwrap();
        let repo = StubRepository::new(vec![s]);
        let seen: Vec<String> = (0..8).map(|_| body_of(&repo.next_response(0))).collect();
        assert_eq!(seen, ["x", "x", "x", "y", "x", "x", "x", "y"]);
    }

    #[test]
    fn test_single_response_repeats_forever() {
        let repo = StubRepository::new(vec![stub(&["only"])]);
        for _ in 0..5 {
            assert_eq!(body_of(&repo.next_response(0)), "only");
        }
    }

    #[test]
    fn test_empty_responses_resolve_to_default() {
        let repo = StubRepository::new(vec![Stub::default()]);
        let config = repo.next_response(0);
        assert!(config.is.is_none());
        assert!(matches!(
            config.kind(),
            crate::imposter::types::ResponseKind::Empty
        ));
    }

    #[test]
    fn test_first_returns_smallest_matching_index() {
        let repo = StubRepository::new(vec![stub(&["a"]), stub(&["b"]), stub(&["c"])]);
        // All stubs have no predicates; the filter sees empty slices.
        let m = repo.first(|_| true);
        assert!(m.success);
        assert_eq!(m.index, 0);
    }

    #[test]
    fn test_first_no_match_is_not_an_error() {
        let repo = StubRepository::new(vec![stub(&["a"])]);
        let m = repo.first(|_| false);
        assert!(!m.success);
    }

    #[test]
    fn test_index_operations_bounds() {
        let repo = StubRepository::new(vec![stub(&["a"])]);
        assert!(repo.delete_at_index(5).is_err());
        assert!(repo.replace_at_index(stub(&["z"]), 1).is_err());
        assert!(repo.replace_at_index(stub(&["z"]), 0).is_ok());
        assert!(repo.delete_at_index(0).is_ok());
        assert_eq!(repo.count(), 0);
    }

    #[test]
    fn test_insert_preserves_neighbour_cursors() {
        let repo = StubRepository::new(vec![stub(&["a1", "a2"])]);
        assert_eq!(body_of(&repo.next_response(0)), "a1");
        // Insert a new stub in front; the old stub is now index 1 and its
        // cursor still points at a2.
        repo.insert_at_index(stub(&["front"]), 0);
        assert_eq!(body_of(&repo.next_response(1)), "a2");
    }

    #[test]
    fn test_request_log_append_and_reset() {
        let repo = StubRepository::new(vec![]);
        repo.add_request(Request {
            method: "GET".into(),
            ..Default::default()
        });
        repo.add_request(Request {
            method: "POST".into(),
            ..Default::default()
        });
        let loaded = repo.load_requests();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].method, "GET");
        assert_eq!(loaded[1].method, "POST");
        repo.delete_saved_requests();
        assert!(repo.load_requests().is_empty());
    }

    #[test]
    fn test_delete_saved_proxy_responses_filters() {
        let mut proxy_stub = stub(&["recorded"]);
        proxy_stub.is_proxy = true;
        let repo = StubRepository::new(vec![stub(&["keep"]), proxy_stub]);
        repo.delete_saved_proxy_responses();
        assert_eq!(repo.count(), 1);
        let remaining = repo.get_all();
        assert!(!remaining[0].is_proxy);
    }
}

//! Scripted persistence: a user-supplied JavaScript module drives the store.
//!
//! The module exports `create(config)`; the returned object provides
//! `load` (or `all`), `add`, `del` (or `delete`) and `deleteAll`. The
//! interpreter is single-threaded, so one worker thread owns it for the
//! store's lifetime and every call is serialized through a channel. That
//! also lets the module keep state between calls.

use super::DataStore;
use crate::errors::EngineError;
use crate::imposter::core::Imposter;
use crate::imposter::types::ImposterConfig;
use crate::scripting::{js_to_json, json_to_js};
use boa_engine::{js_string, Context, JsValue, Source};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::mpsc;
use tracing::debug;

enum Command {
    Load(mpsc::SyncSender<Result<Vec<ImposterConfig>, EngineError>>),
    Add(Value, mpsc::SyncSender<Result<(), EngineError>>),
    Delete(u16, mpsc::SyncSender<Result<(), EngineError>>),
    DeleteAll(mpsc::SyncSender<Result<(), EngineError>>),
}

#[derive(Debug)]
pub struct ScriptedDataStore {
    commands: Mutex<mpsc::Sender<Command>>,
}

impl ScriptedDataStore {
    /// Load and initialize the repository module. Fails fast when the module
    /// does not parse or lacks a `create` factory.
    pub fn new(path: &str) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Validation(format!("cannot read imposters repository {path}: {e}"))
        })?;

        let (tx, rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), EngineError>>(1);

        std::thread::Builder::new()
            .name("scripted-store".to_string())
            .spawn(move || worker(source, rx, init_tx))
            .map_err(|e| EngineError::Validation(format!("cannot start store worker: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| EngineError::Validation("store worker died during init".to_string()))??;

        Ok(ScriptedDataStore {
            commands: Mutex::new(tx),
        })
    }

    fn send<T>(
        &self,
        make: impl FnOnce(mpsc::SyncSender<Result<T, EngineError>>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.commands
            .lock()
            .send(make(reply_tx))
            .map_err(|_| EngineError::Validation("store worker is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| EngineError::Validation("store worker is gone".to_string()))?
    }
}

impl DataStore for ScriptedDataStore {
    fn load(&self) -> Result<Vec<ImposterConfig>, EngineError> {
        self.send(Command::Load)
    }

    fn save(&self, imposter: &Imposter) -> Result<(), EngineError> {
        let config = serde_json::to_value(imposter.to_config())
            .map_err(|e| EngineError::Validation(format!("cannot serialize imposter: {e}")))?;
        self.send(|reply| Command::Add(config, reply))
    }

    fn delete(&self, port: u16) -> Result<(), EngineError> {
        self.send(|reply| Command::Delete(port, reply))
    }

    fn delete_all(&self) -> Result<(), EngineError> {
        self.send(Command::DeleteAll)
    }
}

/// The worker owns the interpreter and the repository object.
fn worker(
    source: String,
    commands: mpsc::Receiver<Command>,
    init: mpsc::SyncSender<Result<(), EngineError>>,
) {
    let mut context = Context::default();
    let repo = match initialize(&mut context, &source) {
        Ok(repo) => {
            let _ = init.send(Ok(()));
            repo
        }
        Err(e) => {
            let _ = init.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            Command::Load(reply) => {
                let _ = reply.send(call_load(&mut context, &repo));
            }
            Command::Add(config, reply) => {
                let _ = reply.send(call_unary(&mut context, &repo, &["add"], &config));
            }
            Command::Delete(port, reply) => {
                let _ = reply.send(call_unary(
                    &mut context,
                    &repo,
                    &["del", "delete"],
                    &Value::Number(port.into()),
                ));
            }
            Command::DeleteAll(reply) => {
                let _ = reply.send(
                    call_method(&mut context, &repo, &["deleteAll"], &[]).map(|_| ()),
                );
            }
        }
    }
    debug!("scripted store worker exiting");
}

/// Evaluate the module and call its `create(config)` factory.
fn initialize(context: &mut Context, source: &str) -> Result<JsValue, EngineError> {
    // CommonJS-shaped scaffolding: module.exports plus an inert require.
    context
        .eval(Source::from_bytes(
            "var module = { exports: {} }; var exports = module.exports; \
             var require = function () { return undefined; };",
        ))
        .map_err(|e| EngineError::Validation(format!("repository scaffolding failed: {e}")))?;

    context
        .eval(Source::from_bytes(source))
        .map_err(|e| EngineError::Validation(format!("repository module failed to load: {e}")))?;

    let create = context
        .eval(Source::from_bytes("module.exports.create"))
        .map_err(|e| EngineError::Validation(format!("repository inspection failed: {e}")))?;
    let create = create.as_callable().ok_or_else(|| {
        EngineError::Validation("repository module does not export create(config)".to_string())
    })?;

    let config = json_to_js(context, &serde_json::json!({}))
        .map_err(|e| EngineError::Validation(format!("repository config failed: {e}")))?;
    let repo = create
        .call(&JsValue::undefined(), &[config], context)
        .map_err(|e| EngineError::Validation(format!("repository create failed: {e}")))?;
    if repo.as_object().is_none() {
        return Err(EngineError::Validation(
            "repository create(config) did not return an object".to_string(),
        ));
    }
    Ok(repo)
}

fn call_method(
    context: &mut Context,
    repo: &JsValue,
    names: &[&str],
    args: &[JsValue],
) -> Result<JsValue, EngineError> {
    let object = repo
        .as_object()
        .ok_or_else(|| EngineError::Validation("repository is not an object".to_string()))?
        .clone();
    for name in names {
        let member = object
            .get(js_string!(*name), context)
            .map_err(|e| EngineError::Validation(format!("repository access failed: {e}")))?;
        if let Some(function) = member.as_callable() {
            return function
                .call(repo, args, context)
                .map_err(|e| EngineError::Validation(format!("repository {name} failed: {e}")));
        }
    }
    Err(EngineError::Validation(format!(
        "repository is missing {}",
        names.join("|")
    )))
}

fn call_load(context: &mut Context, repo: &JsValue) -> Result<Vec<ImposterConfig>, EngineError> {
    let result = call_method(context, repo, &["load", "all"], &[])?;
    let json = js_to_json(context, &result)
        .map_err(|e| EngineError::Validation(format!("repository load result: {e}")))?;
    match json {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| EngineError::InvalidJson(format!("bad persisted imposter: {e}")))
            })
            .collect(),
        other => Err(EngineError::Validation(format!(
            "repository load returned {other}"
        ))),
    }
}

fn call_unary(
    context: &mut Context,
    repo: &JsValue,
    names: &[&str],
    arg: &Value,
) -> Result<(), EngineError> {
    let arg = json_to_js(context, arg)
        .map_err(|e| EngineError::Validation(format!("argument conversion failed: {e}")))?;
    call_method(context, repo, names, &[arg]).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const MEMORY_REPO: &str = r#"
module.exports = {
    create: function (config) {
        var imposters = {};
        return {
            load: function () {
                var list = [];
                for (var port in imposters) { list.push(imposters[port]); }
                return list;
            },
            add: function (imposter) { imposters[String(imposter.port)] = imposter; },
            del: function (port) { delete imposters[String(port)]; },
            deleteAll: function () { imposters = {}; }
        };
    }
};
"#;

    fn store() -> (ScriptedDataStore, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MEMORY_REPO.as_bytes()).unwrap();
        let store = ScriptedDataStore::new(file.path().to_str().unwrap()).unwrap();
        (store, file)
    }

    fn imposter(port: u16) -> Imposter {
        let config: ImposterConfig =
            serde_json::from_value(json!({"protocol": "http", "port": port})).unwrap();
        Imposter::new(config, false)
    }

    #[test]
    fn test_round_trip_through_module() {
        let (store, _file) = store();
        store.save(&imposter(8001)).unwrap();
        store.save(&imposter(8002)).unwrap();

        let mut loaded = store.load().unwrap();
        loaded.sort_by_key(|c| c.port);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].port, Some(8001));

        store.delete(8001).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);

        store.delete_all().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_module_without_create_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"module.exports = {};").unwrap();
        let err = ScriptedDataStore::new(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("create"));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        assert!(ScriptedDataStore::new("/nonexistent/repo.js").is_err());
    }
}

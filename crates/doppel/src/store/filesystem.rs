//! Filesystem persistence: one `<port>.json` per imposter in the datadir.
//!
//! Saves are atomic (temp file then rename) so a crash mid-write never
//! leaves a truncated config behind. Unreadable or malformed files are
//! logged and skipped on load.

use super::DataStore;
use crate::errors::EngineError;
use crate::imposter::core::Imposter;
use crate::imposter::types::ImposterConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;

pub struct FileSystemDataStore {
    datadir: PathBuf,
}

impl FileSystemDataStore {
    pub fn new(datadir: impl Into<PathBuf>) -> Self {
        FileSystemDataStore {
            datadir: datadir.into(),
        }
    }

    fn path_for(&self, port: u16) -> PathBuf {
        self.datadir.join(format!("{port}.json"))
    }
}

impl DataStore for FileSystemDataStore {
    fn load(&self) -> Result<Vec<ImposterConfig>, EngineError> {
        let entries = match fs::read_dir(&self.datadir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::Validation(format!(
                    "cannot read datadir {}: {e}",
                    self.datadir.display()
                )))
            }
        };

        let mut configs = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    error!("cannot read datadir entry: {e}");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_config(&path) {
                Ok(config) => configs.push(config),
                Err(e) => error!("skipping imposter file {}: {e}", path.display()),
            }
        }
        configs.sort_by_key(|config| config.port);
        Ok(configs)
    }

    fn save(&self, imposter: &Imposter) -> Result<(), EngineError> {
        fs::create_dir_all(&self.datadir).map_err(|e| {
            EngineError::Validation(format!(
                "cannot create datadir {}: {e}",
                self.datadir.display()
            ))
        })?;

        let config = imposter.to_config();
        let mut data = serde_json::to_vec_pretty(&config)
            .map_err(|e| EngineError::Validation(format!("cannot serialize imposter: {e}")))?;
        data.push(b'\n');

        let target = self.path_for(imposter.port());
        let temp = target.with_extension("json.tmp");
        fs::write(&temp, &data)
            .and_then(|_| fs::rename(&temp, &target))
            .map_err(|e| {
                EngineError::Validation(format!("cannot write {}: {e}", target.display()))
            })
    }

    fn delete(&self, port: u16) -> Result<(), EngineError> {
        let path = self.path_for(port);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Validation(format!(
                "cannot delete {}: {e}",
                path.display()
            ))),
        }
    }

    fn delete_all(&self) -> Result<(), EngineError> {
        let entries = match fs::read_dir(&self.datadir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Err(e) = fs::remove_file(&path) {
                    error!("cannot delete {}: {e}", path.display());
                }
            }
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<ImposterConfig, EngineError> {
    let data = fs::read_to_string(path)
        .map_err(|e| EngineError::Validation(format!("unreadable: {e}")))?;
    serde_json::from_str(&data).map_err(|e| EngineError::InvalidJson(format!("malformed: {e}")))
}

//! File-per-model persistence for registered device models.
//!
//! Models are the only state that outlives the process. Writes go through a
//! temp file and an atomic rename so a crash never leaves a torn document.

use crate::error::Result;
use fleetsim_core::DeviceModel;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Opens the store, creating the directory when missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Loads every model in the directory, skipping unparseable files.
    pub fn load_all(&self) -> Vec<DeviceModel> {
        let mut models = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read model directory {:?}: {}", self.dir, e);
                return models;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| serde_json::from_str::<DeviceModel>(&data).map_err(|e| e.to_string()))
            {
                Ok(model) => {
                    if let Err(e) = model.validate() {
                        warn!("skipping invalid model file {:?}: {}", path, e);
                        continue;
                    }
                    info!("loaded device model: {}", model.id);
                    models.push(model);
                }
                Err(e) => warn!("failed to load device model from {:?}: {}", path, e),
            }
        }
        models
    }

    /// Persists a model atomically (write-then-rename).
    pub fn persist(&self, model: &DeviceModel) -> Result<()> {
        let json = serde_json::to_vec_pretty(model).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        let tmp = self.dir.join(format!(".{}.json.tmp", model.id));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.path_for(&model.id))?;
        Ok(())
    }

    /// Removes a model file; missing files are not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> DeviceModel {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "Temp",
            "type": "sensor",
            "protocol": "mqtt",
            "telemetry": [{
                "name": "temperature",
                "type": "number",
                "generator": {"type": "random", "min": 0.0, "max": 10.0}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();

        store.persist(&model("t1")).unwrap();
        store.persist(&model("t2")).unwrap();

        let mut loaded = store.load_all();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "t1");
        assert_eq!(loaded[1].id, "t2");
        assert_eq!(loaded[0], model("t1"));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.persist(&model("t1")).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["t1.json"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.persist(&model("t1")).unwrap();

        store.remove("t1").unwrap();
        store.remove("t1").unwrap();
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        store.persist(&model("t1")).unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "t1");
    }
}

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

use super::DeviceConfig;

/// Stable storage for the device configuration document.
pub trait ConfigStore: Send {
    fn load(&self) -> Result<DeviceConfig>;

    fn save(&mut self, document: &DeviceConfig) -> Result<()>;

    fn load_factory(&self) -> Result<DeviceConfig>;
}

/// JSON files on disk: the live document and a read-only factory copy.
pub struct FileConfigStore {
    path: PathBuf,
    factory_path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>, factory_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            factory_path: factory_path.into(),
        }
    }

    fn read(path: &PathBuf) -> Result<DeviceConfig> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<DeviceConfig> {
        Self::read(&self.path)
    }

    fn save(&mut self, document: &DeviceConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn load_factory(&self) -> Result<DeviceConfig> {
        Self::read(&self.factory_path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    current: DeviceConfig,
    factory: Option<DeviceConfig>,
    saves: usize,
    fail_saves: bool,
}

/// In-memory store. Clones share the same state so a caller can keep a
/// handle for inspection after boxing one into a [`super::Configuration`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConfigStore {
    pub fn new(current: DeviceConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                current,
                ..Default::default()
            })),
        }
    }

    pub fn with_factory(current: DeviceConfig, factory: DeviceConfig) -> Self {
        let store = Self::new(current);
        store.lock().factory = Some(factory);
        store
    }

    pub fn current(&self) -> DeviceConfig {
        self.lock().current.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Makes subsequent saves fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<DeviceConfig> {
        Ok(self.lock().current.clone())
    }

    fn save(&mut self, document: &DeviceConfig) -> Result<()> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(Error::Io(std::io::Error::other("storage unavailable")));
        }

        state.current = document.clone();
        state.saves += 1;
        Ok(())
    }

    fn load_factory(&self) -> Result<DeviceConfig> {
        self.lock()
            .factory
            .clone()
            .ok_or_else(|| Error::Config(String::from("no factory configuration")))
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::process;

    use super::*;

    #[test]
    fn test_file_store_round_trip_and_malformed_factory() {
        let dir = env::temp_dir().join(format!("sensornode-store-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("device.json");
        let factory_path = dir.join("device_default.json");
        fs::write(&factory_path, "{ not json").unwrap();

        let mut store = FileConfigStore::new(&path, &factory_path);
        let mut document = DeviceConfig::default();
        document.wifi.ssid = String::from("lab");
        store.save(&document).unwrap();

        assert_eq!(store.load().unwrap().wifi.ssid, "lab");
        assert!(matches!(store.load_factory(), Err(Error::Config(_))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_memory_store_failing_save_keeps_previous_document() {
        let mut store = MemoryConfigStore::new(DeviceConfig::default());
        store.fail_saves(true);

        let mut document = DeviceConfig::default();
        document.system.enable_factory_reset = true;

        assert!(matches!(store.save(&document), Err(Error::Io(_))));
        assert!(!store.current().system.enable_factory_reset);
        assert_eq!(store.save_count(), 0);
    }
}

use std::collections::HashMap;

use crate::config::SensorConfig;
use crate::error::{Error, Result};

use super::SensorDriver;

pub type SensorFactory = Box<dyn Fn(&SensorConfig) -> Result<Box<dyn SensorDriver>> + Send + Sync>;

/// Maps a sensor type tag to the factory building its driver.
#[derive(Default)]
pub struct SensorRegistry {
    factories: HashMap<String, SensorFactory>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&SensorConfig) -> Result<Box<dyn SensorDriver>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SensorConfig) -> Result<Box<dyn SensorDriver>> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, config: &SensorConfig) -> Result<Box<dyn SensorDriver>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| Error::UnknownSensorType(config.kind.clone()))?;

        factory(config)
    }
}

mod store;

pub use store::*;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;

pub const DEFAULT_REPORT_INTERVAL_S: u64 = 60;
pub const DEFAULT_LOOP_INTERVAL_S: u64 = 10;
pub const DEFAULT_STARTUP_DELAY_S: u64 = 3;
pub const DEFAULT_DEEP_SLEEP_INTERVAL_S: u64 = 15;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL_S: u64 = 5;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_S: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub service_led: ServiceLedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub reconnect_strategy: ReconnectStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectStrategy {
    pub max_retries: u32,
    pub interval_seconds: u64,
    pub failure_action: FailureAction,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            interval_seconds: DEFAULT_RETRY_INTERVAL_S,
            failure_action: FailureAction::default(),
        }
    }
}

/// What the node does once Wi-Fi retries are exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    #[default]
    Restart,
    Shutdown,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub client_id: String,
    pub server: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub keep_alive_s: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: String::from("sensornode"),
            server: String::from("localhost"),
            port: DEFAULT_MQTT_PORT,
            user: None,
            password: None,
            keep_alive_s: DEFAULT_KEEP_ALIVE_S,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub mqtt: SystemTopics,
    pub enable_factory_reset: bool,
    pub power: PowerConfig,
    /// Milliseconds, 0 disables the watchdog.
    pub watchdog_timeout: u64,
    pub error_handling: ErrorHandlingConfig,
    pub loop_interval_s: u64,
    pub startup_delay_s: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mqtt: SystemTopics::default(),
            enable_factory_reset: false,
            power: PowerConfig::default(),
            watchdog_timeout: 0,
            error_handling: ErrorHandlingConfig::default(),
            loop_interval_s: DEFAULT_LOOP_INTERVAL_S,
            startup_delay_s: DEFAULT_STARTUP_DELAY_S,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemTopics {
    pub publish: SystemPublishTopics,
    pub subscribe: SystemSubscribeTopics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPublishTopics {
    pub state: Option<String>,
    pub errors: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSubscribeTopics {
    pub commands: Option<String>,
    pub power_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub deep_sleep_interval_s: u64,
    pub sleep_between_cycles: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            deep_sleep_interval_s: DEFAULT_DEEP_SLEEP_INTERVAL_S,
            sleep_between_cycles: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub post_global_errors: bool,
    pub auto_restart_on_error: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            post_global_errors: false,
            auto_restart_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub id: String,
    /// Registry tag selecting the driver implementation.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub mqtt: SensorTopics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub control: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub editable: Map<String, Value>,
    pub read_only: Map<String, Value>,
    pub defaults: Map<String, Value>,
}

impl Parameters {
    /// Seconds between scheduled updates, falling back to the default when
    /// the editable value is absent or not a positive number.
    pub fn report_interval(&self) -> Duration {
        self.editable
            .get("report_interval")
            .and_then(Value::as_f64)
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(DEFAULT_REPORT_INTERVAL_S))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorTopics {
    pub publish: SensorPublishTopics,
    pub subscribe: SensorSubscribeTopics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorPublishTopics {
    pub data: Option<String>,
    pub state: Option<String>,
    pub errors: Option<String>,
    pub info: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSubscribeTopics {
    pub commands: Option<String>,
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLedConfig {
    pub pin: Option<u32>,
    /// Raw per-state entries, validated when a state is indicated.
    pub state_leds: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

/// The single in-memory configuration document and the store backing it.
///
/// All mutation goes through [`Configuration::set_and_persist`], which writes
/// the whole document back to the store before returning.
pub struct Configuration {
    document: DeviceConfig,
    store: Box<dyn ConfigStore>,
}

impl Configuration {
    pub fn new(document: DeviceConfig, store: Box<dyn ConfigStore>) -> Self {
        Self { document, store }
    }

    pub fn load(store: Box<dyn ConfigStore>) -> Result<Self> {
        let document = store.load()?;
        Ok(Self::new(document, store))
    }

    pub fn get(&self) -> &DeviceConfig {
        &self.document
    }

    pub fn sensor(&self, id: &str) -> Option<&SensorConfig> {
        self.document.sensors.iter().find(|sensor| sensor.id == id)
    }

    pub fn set_and_persist<F, R>(&mut self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut DeviceConfig) -> R,
    {
        let result = mutate(&mut self.document);
        self.store.save(&self.document)?;
        debug!("Configuration persisted");
        Ok(result)
    }

    /// Replaces the live document with the factory document and persists it.
    pub fn reset_to_factory(&mut self) -> Result<()> {
        let factory = self.store.load_factory()?;
        self.store.save(&factory)?;
        self.document = factory;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: DeviceConfig = serde_json::from_value(json!({
            "wifi": { "ssid": "lab", "password": "secret" },
            "sensors": [{ "id": "climate", "type": "temperature_humidity" }]
        }))
        .unwrap();

        assert_eq!(config.wifi.reconnect_strategy.max_retries, 10);
        assert_eq!(config.wifi.reconnect_strategy.interval_seconds, 5);
        assert_eq!(
            config.wifi.reconnect_strategy.failure_action,
            FailureAction::Restart
        );
        assert!(!config.system.enable_factory_reset);
        assert!(!config.system.error_handling.post_global_errors);
        assert!(config.system.error_handling.auto_restart_on_error);
        assert_eq!(config.system.power.deep_sleep_interval_s, 15);
        assert_eq!(config.system.loop_interval_s, 10);
        assert_eq!(
            config.sensors[0].parameters.report_interval(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_report_interval_ignores_invalid_values() {
        let mut parameters = Parameters::default();
        parameters.editable.insert("report_interval".into(), json!(-4));
        assert_eq!(parameters.report_interval(), Duration::from_secs(60));

        parameters.editable.insert("report_interval".into(), json!("fast"));
        assert_eq!(parameters.report_interval(), Duration::from_secs(60));

        parameters.editable.insert("report_interval".into(), json!(5));
        assert_eq!(parameters.report_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_set_and_persist_writes_every_mutation() {
        let store = MemoryConfigStore::new(DeviceConfig::default());
        let mut config = Configuration::load(Box::new(store.clone())).unwrap();

        config
            .set_and_persist(|doc| doc.system.power.deep_sleep_interval_s = 30)
            .unwrap();
        config
            .set_and_persist(|doc| doc.system.watchdog_timeout = 5000)
            .unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.current().system.power.deep_sleep_interval_s, 30);
        assert_eq!(store.current().system.watchdog_timeout, 5000);
    }

    #[test]
    fn test_reset_to_factory_replaces_document() {
        let mut factory = DeviceConfig::default();
        factory.system.enable_factory_reset = true;
        let store = MemoryConfigStore::with_factory(DeviceConfig::default(), factory.clone());
        let mut config = Configuration::load(Box::new(store.clone())).unwrap();

        config.reset_to_factory().unwrap();

        assert_eq!(config.get(), &factory);
        assert_eq!(store.current(), factory);
        assert_eq!(store.save_count(), 1);
    }
}

pub mod host;
pub mod mqtt;
pub mod settings;
pub mod simulate;

use std::time::Duration;

use sensornode_core::config::{Configuration, FileConfigStore};
use sensornode_core::platform::effective_watchdog_timeout;
use sensornode_core::sensor::{ClimateSensor, SensorDriver, SensorRegistry};
use sensornode_core::supervisor::{Board, Supervisor};
use tracing::info;

use crate::host::{ConsolePixel, HostNetwork, HostPower, SoftWatchdog};
use crate::mqtt::MqttTransport;
use crate::settings::Settings;
use crate::simulate::{SimulatedClimateProbe, SimulatedDay, SimulatedGasSensor};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node error: {0}")]
    Node(#[from] sensornode_core::Error),
}

/// Sensor types the simulated board can drive.
pub fn simulated_registry(day: SimulatedDay) -> SensorRegistry {
    SensorRegistry::new()
        .with("temperature_humidity", move |_| {
            let probe = SimulatedClimateProbe::new(day);
            Ok(Box::new(ClimateSensor::new(probe)) as Box<dyn SensorDriver>)
        })
        .with("gas", move |config| {
            Ok(Box::new(SimulatedGasSensor::new(&config.id, day)) as Box<dyn SensorDriver>)
        })
}

pub async fn run(settings: &Settings) -> Result<(), SimError> {
    let store = FileConfigStore::new(&settings.device.config_path, &settings.device.factory_path);
    let config = Configuration::load(Box::new(store))?;
    let document = config.get();

    info!(
        "Starting {} with {} sensor(s)",
        document.mqtt.client_id,
        document.sensors.len()
    );

    let watchdog = SoftWatchdog::start(effective_watchdog_timeout(document.system.watchdog_timeout));
    let board = Board {
        transport: MqttTransport::new(&document.mqtt),
        network: HostNetwork::default(),
        power: Box::new(HostPower::new(watchdog.clone())),
        watchdog: Box::new(watchdog),
        pixel: Box::new(ConsolePixel),
    };

    let day = SimulatedDay::new(Duration::from_secs(settings.simulation.day_length_s));
    let mut supervisor = Supervisor::new(config, board, simulated_registry(day));

    supervisor.run().await?;

    Ok(())
}

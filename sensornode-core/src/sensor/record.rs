use std::mem;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, DEFAULT_REPORT_INTERVAL_S, SensorConfig};
use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::message::{ErrorPayload, StatePayload};
use crate::state::SensorState;
use crate::transport::Transport;

use super::{Readings, SensorCommand, SensorDriver};

/// The scheduler's entry for one configured sensor.
///
/// Parameters and topics are always read from the live configuration so a
/// persisted edit is visible on the next access.
pub struct SensorRecord {
    id: String,
    driver: Box<dyn SensorDriver>,
    state: SensorState,
    next_update: Instant,
}

impl SensorRecord {
    pub fn new(id: impl Into<String>, driver: Box<dyn SensorDriver>, next_update: Instant) -> Self {
        Self {
            id: id.into(),
            driver,
            state: SensorState::Active,
            next_update,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn next_update(&self) -> Instant {
        self.next_update
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_update
    }

    pub fn schedule(&mut self, at: Instant) {
        self.next_update = at;
    }

    pub fn settings<'c>(&self, config: &'c Configuration) -> Result<&'c SensorConfig> {
        config
            .sensor(&self.id)
            .ok_or_else(|| Error::sensor(&self.id, "not present in configuration"))
    }

    pub fn report_interval(&self, config: &Configuration) -> Duration {
        config
            .sensor(&self.id)
            .map(|sensor| sensor.parameters.report_interval())
            .unwrap_or(Duration::from_secs(DEFAULT_REPORT_INTERVAL_S))
    }

    async fn publish<T, P>(
        &self,
        ctx: &mut NodeContext<'_, T>,
        kind: &str,
        topic: Option<String>,
        payload: &P,
    ) -> Result<()>
    where
        T: Transport,
        P: Serialize,
    {
        let Some(topic) = topic else {
            warn!("[{}] No {kind} topic found", self.id);
            return Ok(());
        };

        debug!("[{}] publish_{kind} -> {topic}", self.id);
        ctx.transport.publish_json(&topic, payload).await
    }

    pub async fn publish_state<T: Transport>(&self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        let topic = self.settings(ctx.config)?.mqtt.publish.state.clone();
        self.publish(ctx, "state", topic, &StatePayload::new(self.state))
            .await
    }

    /// Publishes a reading. Skipped unless the sensor is active and the
    /// reading is non-empty.
    pub async fn publish_data<T: Transport>(
        &self,
        ctx: &mut NodeContext<'_, T>,
        data: &Readings,
    ) -> Result<()> {
        if self.state != SensorState::Active {
            warn!("[{}] Sensor is {}, skipping data publish", self.id, self.state);
            return Ok(());
        }
        if data.is_empty() {
            warn!("[{}] No data to publish", self.id);
            return Ok(());
        }

        let topic = self.settings(ctx.config)?.mqtt.publish.data.clone();
        self.publish(ctx, "data", topic, data).await
    }

    pub async fn publish_error<T: Transport>(
        &self,
        ctx: &mut NodeContext<'_, T>,
        message: &str,
    ) -> Result<()> {
        let topic = self.settings(ctx.config)?.mqtt.publish.errors.clone();
        self.publish(ctx, "error", topic, &ErrorPayload::new(message))
            .await
    }

    pub async fn publish_info<T: Transport>(&self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        let settings = self.settings(ctx.config)?;
        let topic = settings.mqtt.publish.info.clone();
        let read_only = settings.parameters.read_only.clone();
        self.publish(ctx, "info", topic, &read_only).await
    }

    /// One scheduled pass: state, then a reading unless disabled.
    pub async fn update<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        self.publish_state(ctx).await?;

        if self.state == SensorState::Disabled {
            debug!("[{}] Sensor disabled, skipping read", self.id);
            return Ok(());
        }

        let editable = &self.settings(ctx.config)?.parameters.editable;
        let data = self.driver.read_values(editable)?;
        self.publish_data(ctx, &data).await
    }

    /// Publishes the fault and moves the sensor to `Error`. Never fails.
    pub async fn isolate_fault<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>, message: &str) {
        error!("[{}] {message}", self.id);

        if let Err(e) = self.publish_error(ctx, message).await {
            error!("[{}] Error cannot be published: {e}", self.id);
        }
        if let Err(e) = self.mark_error(ctx).await {
            error!("[{}] Error state cannot be published: {e}", self.id);
        }
    }

    pub async fn mark_error<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        self.state = SensorState::Error;
        self.publish_state(ctx).await
    }

    /// Runs a remote command if it is both known and listed in the sensor's
    /// control capabilities.
    pub async fn process_command<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        command: &str,
    ) -> Result<()> {
        let allowed = self
            .settings(ctx.config)?
            .capabilities
            .control
            .iter()
            .any(|c| c == command);

        let command = match command.parse::<SensorCommand>() {
            Ok(command) if allowed => command,
            _ => {
                return Err(Error::Protocol(format!("unsupported command '{command}'")));
            }
        };

        info!("[{}] Processing command '{command}'", self.id);
        match command {
            SensorCommand::Enable => self.enable(ctx).await,
            SensorCommand::Disable => self.disable(ctx).await,
            SensorCommand::SelfTest => {
                let passed = self.driver.do_self_test();
                info!("[{}] Self-test {}", self.id, if passed { "passed" } else { "failed" });
                Ok(())
            }
            SensorCommand::FactoryReset => self.factory_reset(ctx).await,
        }
    }

    pub async fn enable<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        if self.state != SensorState::Disabled {
            debug!("[{}] Enable ignored in state {}", self.id, self.state);
            return Ok(());
        }

        info!("[{}] Enabling sensor", self.id);
        self.state = SensorState::Active;
        self.publish_state(ctx).await
    }

    pub async fn disable<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        if self.state != SensorState::Active {
            debug!("[{}] Disable ignored in state {}", self.id, self.state);
            return Ok(());
        }

        info!("[{}] Disabling sensor", self.id);
        self.state = SensorState::Disabled;
        self.publish_state(ctx).await
    }

    /// Writes one editable parameter and persists the configuration.
    ///
    /// Rejects undeclared keys, values of a different JSON type than the
    /// declared one, and a non-positive `report_interval`.
    pub fn update_parameter<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let editable = &self.settings(ctx.config)?.parameters.editable;
        let Some(current) = editable.get(key) else {
            return Err(Error::Protocol(format!("'{key}' is not in editable parameters")));
        };
        validate_editable(key, current, &value)?;

        let old = current.clone();
        self.write_editable(ctx, key, value.clone())?;
        info!("[{}] Updated parameter '{key}' from '{old}' to '{value}'", self.id);
        Ok(())
    }

    /// Restores every editable parameter that has a factory default, then
    /// forces the sensor back to `Active`.
    pub async fn factory_reset<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>) -> Result<()> {
        let parameters = self.settings(ctx.config)?.parameters.clone();
        if parameters.defaults.is_empty() {
            warn!("[{}] No factory defaults found", self.id);
        }

        for (key, default) in parameters.defaults {
            let Some(old) = parameters.editable.get(&key) else {
                warn!("[{}] '{key}' is not in editable parameters", self.id);
                continue;
            };
            if let Err(e) = validate_editable(&key, old, &default) {
                warn!("[{}] Skipping factory default: {e}", self.id);
                continue;
            }

            info!("[{}] Reset '{key}' from '{old}' to default '{default}'", self.id);
            self.write_editable(ctx, &key, default)?;
        }

        info!("[{}] Factory reset completed", self.id);
        self.state = SensorState::Active;
        self.publish_state(ctx).await
    }

    fn write_editable<T: Transport>(
        &self,
        ctx: &mut NodeContext<'_, T>,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let id = self.id.as_str();
        ctx.config.set_and_persist(|doc| {
            if let Some(sensor) = doc.sensors.iter_mut().find(|sensor| sensor.id == id) {
                sensor.parameters.editable.insert(key.to_string(), value);
            }
        })
    }
}

/// Checks `value` against the declared `current` value of an editable key.
///
/// The JSON kind must match unless the declared value is null, and
/// `report_interval` must be a positive finite number.
fn validate_editable(key: &str, current: &Value, value: &Value) -> Result<()> {
    if !current.is_null() && mem::discriminant(current) != mem::discriminant(value) {
        return Err(Error::Protocol(format!(
            "'{key}' expects a value like {current}, got {value}"
        )));
    }
    if key == "report_interval" && !value.as_f64().is_some_and(|v| v.is_finite() && v > 0.0) {
        return Err(Error::Protocol(format!(
            "report_interval must be a positive number, got {value}"
        )));
    }

    Ok(())
}

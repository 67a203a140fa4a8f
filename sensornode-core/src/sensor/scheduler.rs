use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SensorConfig;
use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::message::{parse_command, parse_object};
use crate::transport::{Inbound, Transport};

use super::{SensorRecord, SensorRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Commands,
    Config,
}

/// Owns the configured sensors, polls each on its own interval and applies
/// remote commands and parameter updates to them.
///
/// Faults are contained per sensor: nothing returned from here is an error.
#[derive(Default)]
pub struct SensorScheduler {
    sensors: Vec<SensorRecord>,
    routes: HashMap<String, (usize, Route)>,
}

impl SensorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensor_ids(&self) -> Vec<&str> {
        self.sensors.iter().map(SensorRecord::id).collect()
    }

    pub fn sensor(&self, id: &str) -> Option<&SensorRecord> {
        self.sensors.iter().find(|sensor| sensor.id() == id)
    }

    /// Every topic a sensor listens on.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn handles(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    /// Builds every configured sensor. A sensor that cannot be created or
    /// initialized is reported to the error handler and skipped.
    pub async fn initialize_sensors<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        registry: &SensorRegistry,
        now: Instant,
    ) {
        let configured = ctx.config.get().sensors.clone();

        for sensor in configured {
            if let Err(e) = self.load_sensor(ctx, registry, &sensor, now).await {
                ctx.report_error(&format!("Failed to load sensor '{}': {e}", sensor.id))
                    .await;
            }
        }

        info!("{} of {} sensors loaded", self.sensors.len(), ctx.config.get().sensors.len());
    }

    async fn load_sensor<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        registry: &SensorRegistry,
        config: &SensorConfig,
        now: Instant,
    ) -> Result<()> {
        if self.sensor(&config.id).is_some() {
            return Err(Error::Config(format!("duplicate sensor id '{}'", config.id)));
        }

        let mut driver = registry.create(config)?;
        driver
            .initialize()
            .map_err(|e| Error::sensor(&config.id, e))?;

        let subscribe = &config.mqtt.subscribe;
        let topics = [
            (subscribe.commands.as_ref(), Route::Commands),
            (subscribe.config.as_ref(), Route::Config),
        ];
        if subscribe.commands.is_some() && subscribe.commands == subscribe.config {
            return Err(Error::Config(format!(
                "sensor '{}' uses one topic for both commands and config",
                config.id
            )));
        }
        for topic in topics.iter().filter_map(|(topic, _)| *topic) {
            if self.routes.contains_key(topic) {
                return Err(Error::Config(format!("topic {topic} is already routed to a sensor")));
            }
        }

        let record = SensorRecord::new(config.id.clone(), driver, now);
        if let Err(e) = record.publish_info(ctx).await {
            warn!("[{}] Failed to publish info: {e}", config.id);
        }

        let index = self.sensors.len();
        for (topic, route) in topics {
            let Some(topic) = topic else {
                continue;
            };

            debug!("[{}] Subscribing to {topic}", config.id);
            if let Err(e) = ctx.transport.subscribe(topic).await {
                warn!("[{}] Failed to subscribe to {topic}: {e}", config.id);
            }
            self.routes.insert(topic.clone(), (index, route));
        }

        self.sensors.push(record);
        info!("Sensor '{}' initialized", config.id);
        Ok(())
    }

    /// One scheduler tick over every sensor whose update time has elapsed.
    ///
    /// A sensor whose update fails, including a publish on a dropped link, is
    /// isolated; its schedule advances either way.
    pub async fn update_sensors<T: Transport>(&mut self, ctx: &mut NodeContext<'_, T>, now: Instant) {
        if !ctx.transport.is_connected() {
            warn!("Transport not connected, sensor publishes will fail");
        }

        for record in &mut self.sensors {
            if !record.is_due(now) {
                continue;
            }

            if let Err(e) = record.update(ctx).await {
                record
                    .isolate_fault(ctx, &format!("Error during sensor update: {e}"))
                    .await;
            }

            let interval = record.report_interval(ctx.config);
            record.schedule(now + interval);
        }
    }

    /// Applies a message received on a sensor topic. Returns `false` when no
    /// sensor subscribed to `message.topic`.
    pub async fn handle_message<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        message: &Inbound,
        now: Instant,
    ) -> bool {
        let Some(&(index, route)) = self.routes.get(&message.topic) else {
            return false;
        };
        let Some(record) = self.sensors.get_mut(index) else {
            return false;
        };

        debug!("[{}] Message received on topic {}", record.id(), message.topic);

        let result = match route {
            Route::Commands => Self::apply_command(record, ctx, &message.payload).await,
            Route::Config => Self::apply_config(record, ctx, &message.payload, now).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_protocol() => {
                warn!("[{}] Dropping message on {}: {e}", record.id(), message.topic);
            }
            Err(e) => {
                record
                    .isolate_fault(ctx, &format!("Error processing message: {e}"))
                    .await;
            }
        }

        true
    }

    async fn apply_command<T: Transport>(
        record: &mut SensorRecord,
        ctx: &mut NodeContext<'_, T>,
        payload: &[u8],
    ) -> Result<()> {
        let command = parse_command(payload)?;
        record.process_command(ctx, &command).await
    }

    async fn apply_config<T: Transport>(
        record: &mut SensorRecord,
        ctx: &mut NodeContext<'_, T>,
        payload: &[u8],
        now: Instant,
    ) -> Result<()> {
        let parameters = parse_object(payload)?;
        info!("[{}] Updating configuration: {parameters:?}", record.id());

        for (key, value) in parameters {
            match record.update_parameter(ctx, &key, value) {
                Ok(()) if key == "report_interval" => {
                    let interval = record.report_interval(ctx.config);
                    record.schedule(now + interval);
                    info!("[{}] Report interval updated: {interval:?}", record.id());
                }
                Ok(()) => {}
                Err(e) if e.is_protocol() => warn!("[{}] {e}", record.id()),
                Err(e) => {
                    error!("[{}] Failed to update '{key}': {e}", record.id());
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

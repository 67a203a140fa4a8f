use tracing::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::context::NodeContext;
use crate::error::Result;
use crate::message::{PowerConfigPatch, parse_command};
use crate::transport::{Inbound, Transport};

/// Handles device-wide remote commands and live power configuration.
pub struct SystemCommandProcessor {
    commands_topic: Option<String>,
    power_config_topic: Option<String>,
}

impl SystemCommandProcessor {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            commands_topic: config.mqtt.subscribe.commands.clone(),
            power_config_topic: config.mqtt.subscribe.power_config.clone(),
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        [&self.commands_topic, &self.power_config_topic]
            .into_iter()
            .filter_map(|topic| topic.as_deref())
    }

    pub fn handles(&self, topic: &str) -> bool {
        self.subscriptions().any(|t| t == topic)
    }

    pub async fn initialize<T: Transport>(&self, ctx: &mut NodeContext<'_, T>) {
        for (name, topic) in [
            ("commands", &self.commands_topic),
            ("power_config", &self.power_config_topic),
        ] {
            let Some(topic) = topic else {
                warn!("No system {name} topic configured");
                continue;
            };

            debug!("System subscribing to {topic}");
            if let Err(e) = ctx.transport.subscribe(topic).await {
                warn!("Failed to subscribe to {topic}: {e}");
            }
        }
    }

    /// Returns `false` when `message` is not on a system topic.
    pub async fn handle_message<T: Transport>(
        &mut self,
        ctx: &mut NodeContext<'_, T>,
        message: &Inbound,
    ) -> bool {
        let result = if self.commands_topic.as_deref() == Some(message.topic.as_str()) {
            Self::apply_command(ctx, &message.payload).await
        } else if self.power_config_topic.as_deref() == Some(message.topic.as_str()) {
            Self::apply_power_config(ctx, &message.payload)
        } else {
            return false;
        };

        if let Err(e) = result {
            error!("Message parse error: {e}");
            ctx.report_error(&format!("Message parse error: {e}")).await;
        }

        true
    }

    async fn apply_command<T: Transport>(ctx: &mut NodeContext<'_, T>, payload: &[u8]) -> Result<()> {
        let command = parse_command(payload)?;

        match command.as_str() {
            "factory_reset" if ctx.config.get().system.enable_factory_reset => {
                info!("Handling factory reset command");
                ctx.config.reset_to_factory()?;

                info!("Rebooting after factory reset");
                ctx.power.reboot();
            }
            "shutdown" => {
                info!("Handling shutdown command");
                ctx.power.shutdown();
            }
            "reboot" => {
                info!("Handling reboot command");
                ctx.power.reboot();
            }
            other => warn!("Unknown or disabled system command: {other}"),
        }

        Ok(())
    }

    fn apply_power_config<T: Transport>(ctx: &mut NodeContext<'_, T>, payload: &[u8]) -> Result<()> {
        let patch: PowerConfigPatch = serde_json::from_slice(payload)?;

        let (interval, timeout) = match (patch.deep_sleep_interval_s(), patch.watchdog_timeout_ms()) {
            (Ok(interval), Ok(timeout)) => (interval, timeout),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Ignoring power config: {e}");
                return Ok(());
            }
        };

        info!("Updating power config: deep_sleep_interval_s={interval:?}, watchdog_timeout={timeout:?}");

        if interval.is_none() && timeout.is_none() {
            return Ok(());
        }

        ctx.config.set_and_persist(|doc| {
            if let Some(interval) = interval {
                doc.system.power.deep_sleep_interval_s = interval;
            }
            if let Some(timeout) = timeout {
                doc.system.watchdog_timeout = timeout;
            }
        })
    }
}

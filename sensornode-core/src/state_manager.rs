use tracing::{debug, error, warn};

use crate::config::SystemConfig;
use crate::indicator::Indicator;
use crate::message::StatePayload;
use crate::state::DeviceState;
use crate::transport::Transport;

/// Makes device state changes visible: on the status LED and on the broker.
pub struct StateManager {
    indicator: Indicator,
    state_topic: Option<String>,
}

impl StateManager {
    pub fn new(indicator: Indicator, config: &SystemConfig) -> Self {
        Self {
            indicator,
            state_topic: config.mqtt.publish.state.clone(),
        }
    }

    pub fn indicator(&mut self) -> &mut Indicator {
        &mut self.indicator
    }

    pub async fn handle_state_change<T: Transport>(&mut self, state: DeviceState, transport: &mut T) {
        self.indicator.indicate_state(state).await;

        let Some(topic) = self.state_topic.as_deref() else {
            warn!("No state topic configured, dropping state {state}");
            return;
        };

        if !transport.is_connected() {
            warn!("Transport not connected, dropping state {state}");
            return;
        }

        match transport.publish_json(topic, &StatePayload::new(state)).await {
            Ok(()) => debug!("Published state {state} to {topic}"),
            Err(e) => error!("Failed to publish state {state}: {e}"),
        }
    }
}

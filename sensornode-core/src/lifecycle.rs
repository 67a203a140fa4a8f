use tracing::info;

use crate::state::DeviceState;
use crate::state_manager::StateManager;
use crate::transport::Transport;

/// Device-wide state holder.
///
/// Transitions are unconditional: every state may move to every other,
/// `GlobalError` included.
pub struct Lifecycle {
    state: DeviceState,
    state_manager: StateManager,
}

impl Lifecycle {
    pub fn new(state_manager: StateManager) -> Self {
        Self {
            state: DeviceState::default(),
            state_manager,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn state_manager(&mut self) -> &mut StateManager {
        &mut self.state_manager
    }

    pub async fn transition_to<T: Transport>(&mut self, state: DeviceState, transport: &mut T) {
        info!("Transitioning from {} to {state}", self.state);
        self.state = state;
        self.state_manager.handle_state_change(state, transport).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::config::{ServiceLedConfig, SystemConfig};
    use crate::indicator::{Indicator, Rgb};
    use crate::mock::{MockTransport, RecordingPixel};

    use super::*;

    fn build_lifecycle(pixel: &RecordingPixel, state_topic: Option<&str>) -> Lifecycle {
        let led = ServiceLedConfig {
            pin: None,
            state_leds: serde_json::from_value(json!({
                "STARTUP": {"color": [0, 0, 255], "blink_pattern": [0.5], "times": 0},
                "ACTIVE": {"color": [0, 255, 0], "blink_pattern": [0.5], "times": 1}
            }))
            .unwrap(),
        };
        let mut system = SystemConfig::default();
        system.mqtt.publish.state = state_topic.map(String::from);

        let indicator = Indicator::new(Box::new(pixel.clone()), &led);
        Lifecycle::new(StateManager::new(indicator, &system))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_publishes_and_indicates() {
        let pixel = RecordingPixel::new();
        let mut transport = MockTransport::connected();
        let mut lifecycle = build_lifecycle(&pixel, Some("node/state"));
        assert_eq!(lifecycle.state(), DeviceState::Inactive);

        lifecycle.transition_to(DeviceState::Startup, &mut transport).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(lifecycle.state(), DeviceState::Startup);
        assert_eq!(transport.published_json("node/state"), vec![json!({"state": "STARTUP"})]);
        assert_eq!(pixel.last(), Some(Rgb(0, 0, 255)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_dropped_when_disconnected_or_unconfigured() {
        let pixel = RecordingPixel::new();
        let mut transport = MockTransport::new();
        let mut lifecycle = build_lifecycle(&pixel, Some("node/state"));

        lifecycle.transition_to(DeviceState::Active, &mut transport).await;
        assert!(transport.published().is_empty());

        let mut transport = MockTransport::connected();
        let mut lifecycle = build_lifecycle(&pixel, None);
        lifecycle.transition_to(DeviceState::GlobalError, &mut transport).await;
        lifecycle.transition_to(DeviceState::Active, &mut transport).await;

        assert!(transport.published().is_empty());
        assert_eq!(lifecycle.state(), DeviceState::Active);
    }
}

use tracing::{debug, error, info};

use crate::config::SystemConfig;
use crate::message::ErrorPayload;
use crate::platform::Power;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub post_global_errors: bool,
    pub auto_restart_on_error: bool,
    pub error_topic: Option<String>,
}

impl From<&SystemConfig> for ErrorPolicy {
    fn from(config: &SystemConfig) -> Self {
        Self {
            post_global_errors: config.error_handling.post_global_errors,
            auto_restart_on_error: config.error_handling.auto_restart_on_error,
            error_topic: config.mqtt.publish.errors.clone(),
        }
    }
}

/// What happened after an error was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A reboot was requested from the power collaborator.
    Restarted,
    /// Control returns to the caller.
    Resumed,
}

/// Central sink for faults that cannot be contained locally.
pub struct ErrorHandler {
    policy: ErrorPolicy,
}

impl ErrorHandler {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ErrorPolicy {
        &self.policy
    }

    pub async fn handle_error<T: Transport>(
        &self,
        message: &str,
        transport: &mut T,
        power: &mut dyn Power,
    ) -> Disposition {
        error!("Handling error: {message}");

        if self.policy.post_global_errors {
            match self.policy.error_topic.as_deref() {
                Some(topic) if transport.is_connected() => {
                    debug!("Publishing error to {topic}");
                    if let Err(e) = transport.publish_json(topic, &ErrorPayload::new(message)).await {
                        error!("Failed to publish error: {e}");
                    }
                }
                Some(topic) => error!("Transport not connected, not publishing error to {topic}"),
                None => error!("No error topic configured, not publishing error"),
            }
        } else {
            debug!("Not publishing error to global errors topic");
        }

        if self.policy.auto_restart_on_error {
            info!("Auto-restarting system due to error");
            power.reboot();
            Disposition::Restarted
        } else {
            info!("Not auto-restarting system due to error");
            Disposition::Resumed
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::mock::{MockPower, MockTransport};

    use super::*;

    fn policy(post: bool, restart: bool, topic: Option<&str>) -> ErrorPolicy {
        ErrorPolicy {
            post_global_errors: post,
            auto_restart_on_error: restart,
            error_topic: topic.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_without_auto_restart_returns_to_caller() {
        let handler = ErrorHandler::new(policy(false, false, Some("node/errors")));
        let mut transport = MockTransport::connected();
        let mut power = MockPower::new();

        let disposition = handler.handle_error("boom", &mut transport, &mut power).await;

        assert_eq!(disposition, Disposition::Resumed);
        assert_eq!(power.reboots(), 0);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_publishes_and_restarts() {
        let handler = ErrorHandler::new(policy(true, true, Some("node/errors")));
        let mut transport = MockTransport::connected();
        let mut power = MockPower::new();

        let disposition = handler.handle_error("boom", &mut transport, &mut power).await;

        assert_eq!(disposition, Disposition::Restarted);
        assert_eq!(power.reboots(), 1);
        let published = transport.published_json("node/errors");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["error"], json!("boom"));
        assert!(published[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_publish_skipped_without_connection_or_topic() {
        let mut power = MockPower::new();

        let handler = ErrorHandler::new(policy(true, false, Some("node/errors")));
        let mut offline = MockTransport::new();
        handler.handle_error("boom", &mut offline, &mut power).await;
        assert!(offline.published().is_empty());

        let handler = ErrorHandler::new(policy(true, false, None));
        let mut online = MockTransport::connected();
        handler.handle_error("boom", &mut online, &mut power).await;
        assert!(online.published().is_empty());
    }
}

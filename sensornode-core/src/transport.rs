use serde::Serialize;

use crate::error::Result;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Inbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe link to the remote broker.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<()>;

    /// Fails with [`crate::Error::NotConnected`] when the link is down.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Drains messages received since the last call without blocking.
    fn poll(&mut self) -> Vec<Inbound>;

    async fn publish_json<T: Serialize>(&mut self, topic: &str, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.publish(topic, &bytes).await
    }
}

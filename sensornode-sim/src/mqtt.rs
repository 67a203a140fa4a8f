use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use sensornode_core::config::MqttConfig;
use sensornode_core::transport::{Inbound, Transport};
use sensornode_core::{Error, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;
const DEFAULT_CLIENT_ID: &str = "sensornode";

/// Broker link backed by a `rumqttc` event loop running on its own task.
pub struct MqttTransport {
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    connected_tx: watch::Sender<bool>,
    connected: watch::Receiver<bool>,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> Self {
        let client_id = match config.client_id.trim() {
            "" => DEFAULT_CLIENT_ID,
            id => id,
        };
        let mut options = MqttOptions::new(client_id, &config.server, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_s.max(5)));

        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options.set_credentials(user, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);

        Self {
            client,
            event_loop: Some(event_loop),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            inbound_tx,
            inbound,
            connected_tx,
            connected,
        }
    }

    fn spawn_event_loop(&mut self, mut event_loop: EventLoop) {
        let client = self.client.clone();
        let subscriptions = self.subscriptions.clone();
        let inbound_tx = self.inbound_tx.clone();
        let connected_tx = self.connected_tx.clone();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        connected_tx.send_replace(true);

                        let topics = match subscriptions.lock() {
                            Ok(topics) => topics.clone(),
                            Err(poisoned) => poisoned.into_inner().clone(),
                        };
                        for topic in topics {
                            if let Err(e) = client.try_subscribe(&topic, QoS::AtLeastOnce) {
                                warn!("Failed to resubscribe to {topic}: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!("Received message on {}", publish.topic);
                        let message = Inbound::new(publish.topic, publish.payload.to_vec());
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected_tx.send_replace(false) {
                            warn!("MQTT connection lost: {e}");
                        } else {
                            debug!("MQTT connection attempt failed: {e}");
                        }
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
    }
}

impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(event_loop) = self.event_loop.take() {
            self.spawn_event_loop(event_loop);
        }

        match timeout(CONNECT_TIMEOUT, self.connected.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Transport("event loop stopped".to_string())),
            Err(_) => Err(Error::Transport(format!(
                "no broker acknowledgement within {}s",
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .map_err(|_| Error::Transport("subscription list poisoned".to_string()))?;
            if !subscriptions.iter().any(|known| known == topic) {
                subscriptions.push(topic.to_string());
            }
        }

        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn poll(&mut self) -> Vec<Inbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let mut transport = MqttTransport::new(&MqttConfig::default());

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("node/state", b"{}").await,
            Err(Error::NotConnected)
        ));
        assert!(transport.poll().is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_remembered_while_offline() {
        let mut transport = MqttTransport::new(&MqttConfig::default());

        let _ = transport.subscribe("node/commands").await;
        let _ = transport.subscribe("node/commands").await;
        let _ = transport.subscribe("node/power").await;

        let subscriptions = transport.subscriptions.lock().unwrap().clone();
        assert_eq!(subscriptions, vec!["node/commands", "node/power"]);
    }
}

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{FailureAction, ReconnectStrategy, WifiConfig};
use crate::error::{Error, Result};
use crate::platform::{NetworkLink, Power};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    /// Retries exhausted with `failure_action = continue`.
    Degraded,
}

/// Brings the wireless link up with bounded retries.
pub struct WifiManager<N: NetworkLink> {
    link: N,
    ssid: String,
    password: String,
    strategy: ReconnectStrategy,
}

impl<N: NetworkLink> WifiManager<N> {
    pub fn new(link: N, config: &WifiConfig) -> Self {
        info!("WiFiManager initializing");

        Self {
            link,
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            strategy: config.reconnect_strategy.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn link(&self) -> &N {
        &self.link
    }

    pub async fn connect(&mut self, power: &mut dyn Power) -> Result<LinkStatus> {
        if self.ssid.is_empty() || self.password.is_empty() {
            return Err(Error::Config(String::from("missing SSID or password")));
        }

        if self.link.is_connected() {
            return Ok(LinkStatus::Connected);
        }

        let attempts = self.strategy.max_retries.max(1);
        let interval = Duration::from_secs(self.strategy.interval_seconds);

        for attempt in 1..=attempts {
            info!("Connecting to '{}' (attempt {attempt}/{attempts})", self.ssid);

            match self.link.begin(&self.ssid, &self.password).await {
                Ok(()) if self.link.is_connected() => {
                    info!("Wi-Fi connected");
                    return Ok(LinkStatus::Connected);
                }
                Ok(()) => warn!("Wi-Fi association still pending"),
                Err(e) => warn!("Wi-Fi attempt {attempt} failed: {e}"),
            }

            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        let action = self.strategy.failure_action;
        error!("Wi-Fi connect failed after {attempts} attempts; action={action:?}");

        match action {
            FailureAction::Restart => {
                info!("Restarting device");
                power.reboot();
                Err(Error::Network(String::from("Wi-Fi unavailable, restart requested")))
            }
            FailureAction::Shutdown => {
                info!("Shutting down device");
                power.shutdown();
                Err(Error::Network(String::from("Wi-Fi unavailable, shutdown requested")))
            }
            FailureAction::Continue => {
                warn!("Continuing without Wi-Fi, running degraded");
                Ok(LinkStatus::Degraded)
            }
        }
    }

    /// Reconnects if the link dropped since the last check.
    pub async fn check_connection(&mut self, power: &mut dyn Power) -> Result<LinkStatus> {
        if self.link.is_connected() {
            return Ok(LinkStatus::Connected);
        }

        warn!("Wi-Fi lost, reconnecting");
        self.connect(power).await
    }

    pub fn disconnect(&mut self) {
        info!("Disconnecting from Wi-Fi");
        self.link.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use crate::mock::{MockNetwork, MockPower};

    use super::*;

    fn wifi(action: FailureAction) -> WifiConfig {
        WifiConfig {
            ssid: String::from("lab"),
            password: String::from("secret"),
            reconnect_strategy: ReconnectStrategy {
                max_retries: 3,
                interval_seconds: 5,
                failure_action: action,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_runs_degraded() {
        let network = MockNetwork::unreachable();
        let mut power = MockPower::new();
        let mut manager = WifiManager::new(network.clone(), &wifi(FailureAction::Continue));
        let started = Instant::now();

        let status = manager.connect(&mut power).await.unwrap();

        assert_eq!(status, LinkStatus::Degraded);
        assert_eq!(network.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(power.reboots(), 0);
        assert_eq!(power.shutdowns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_actions_restart_and_shutdown() {
        let mut power = MockPower::new();

        let mut manager = WifiManager::new(MockNetwork::unreachable(), &wifi(FailureAction::Restart));
        assert!(manager.connect(&mut power).await.is_err());
        assert_eq!(power.reboots(), 1);

        let mut manager = WifiManager::new(MockNetwork::unreachable(), &wifi(FailureAction::Shutdown));
        assert!(manager.connect(&mut power).await.is_err());
        assert_eq!(power.shutdowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_within_retry_budget() {
        let network = MockNetwork::failing_times(2);
        let mut power = MockPower::new();
        let mut manager = WifiManager::new(network.clone(), &wifi(FailureAction::Restart));

        assert_eq!(manager.connect(&mut power).await.unwrap(), LinkStatus::Connected);
        assert_eq!(network.attempts(), 3);

        network.set_connected(false);
        assert!(!manager.is_connected());
        manager.check_connection(&mut power).await.unwrap();
        assert_eq!(network.attempts(), 4);
        assert_eq!(power.reboots(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let mut config = wifi(FailureAction::Continue);
        config.password.clear();
        let mut manager = WifiManager::new(MockNetwork::new(), &config);

        assert!(matches!(
            manager.connect(&mut MockPower::new()).await,
            Err(Error::Config(_))
        ));
    }
}

use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sensornode_core::Result;
use sensornode_core::indicator::{Rgb, StatusPixel};
use sensornode_core::platform::{NetworkLink, Power, Watchdog};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Exit code asking the process supervisor to start the node again.
pub const RESTART_EXIT_CODE: i32 = 3;

/// Power control for a hosted node; deep sleep holds off the watchdog.
pub struct HostPower {
    watchdog: SoftWatchdog,
}

impl HostPower {
    pub fn new(watchdog: SoftWatchdog) -> Self {
        Self { watchdog }
    }
}

impl Power for HostPower {
    fn reboot(&mut self) {
        warn!("Rebooting node");
        process::exit(RESTART_EXIT_CODE);
    }

    fn shutdown(&mut self) {
        warn!("Shutting down node");
        process::exit(0);
    }

    fn deep_sleep(&mut self, duration: Duration) {
        info!("Deep sleep for {}s", duration.as_secs());
        self.watchdog.hold(duration);
        std::thread::sleep(duration);
        self.watchdog.feed();
    }
}

/// Software watchdog: exits the process when not fed within the timeout.
///
/// Clones share the same feed time.
#[derive(Clone)]
pub struct SoftWatchdog {
    last_feed: Option<Arc<Mutex<Instant>>>,
}

impl SoftWatchdog {
    pub fn start(timeout: Option<Duration>) -> Self {
        let Some(timeout) = timeout else {
            info!("Watchdog disabled");
            return Self { last_feed: None };
        };

        let last_feed = Arc::new(Mutex::new(Instant::now()));
        let watched = last_feed.clone();

        tokio::spawn(async move {
            loop {
                sleep(timeout / 4).await;

                let since = match watched.lock() {
                    Ok(fed) => fed.elapsed(),
                    Err(poisoned) => poisoned.into_inner().elapsed(),
                };
                if since > timeout {
                    error!("Watchdog expired after {}ms", since.as_millis());
                    process::exit(RESTART_EXIT_CODE);
                }
            }
        });

        info!("Watchdog armed with {}ms timeout", timeout.as_millis());
        Self {
            last_feed: Some(last_feed),
        }
    }

    /// Counts the watchdog as fed until `duration` from now.
    pub fn hold(&self, duration: Duration) {
        self.set_fed(Instant::now() + duration);
    }

    fn set_fed(&self, at: Instant) {
        if let Some(last_feed) = &self.last_feed {
            match last_feed.lock() {
                Ok(mut fed) => *fed = at,
                Err(poisoned) => *poisoned.into_inner() = at,
            }
        }
    }
}

impl Watchdog for SoftWatchdog {
    fn feed(&mut self) {
        self.set_fed(Instant::now());
    }
}

/// Status pixel rendered as log lines.
pub struct ConsolePixel;

impl StatusPixel for ConsolePixel {
    fn write(&mut self, color: Rgb) -> Result<()> {
        let Rgb(r, g, b) = color;
        debug!("Status LED #{r:02x}{g:02x}{b:02x}");
        Ok(())
    }
}

/// The host is always on a network; association only records the SSID.
#[derive(Default)]
pub struct HostNetwork {
    ssid: Option<String>,
}

impl NetworkLink for HostNetwork {
    fn is_connected(&self) -> bool {
        self.ssid.is_some()
    }

    async fn begin(&mut self, ssid: &str, _password: &str) -> Result<()> {
        debug!("Associating with {ssid}");
        self.ssid = Some(ssid.to_string());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.ssid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_network_tracks_association() {
        let mut network = HostNetwork::default();
        assert!(!network.is_connected());

        network.begin("lab", "secret").await.unwrap();
        assert!(network.is_connected());

        network.disconnect();
        assert!(!network.is_connected());
    }

    #[test]
    fn test_disabled_watchdog_feeds_quietly() {
        let mut watchdog = SoftWatchdog::start(None);
        watchdog.feed();
        assert!(watchdog.last_feed.is_none());
    }

    fn fed_at(watchdog: &SoftWatchdog) -> Instant {
        *watchdog.last_feed.as_ref().unwrap().lock().unwrap()
    }

    #[tokio::test]
    async fn test_deep_sleep_keeps_watchdog_fed() {
        let watchdog = SoftWatchdog::start(Some(Duration::from_secs(60)));
        let mut power = HostPower::new(watchdog.clone());
        let before = Instant::now();

        watchdog.hold(Duration::from_secs(10));
        assert!(fed_at(&watchdog) >= before + Duration::from_secs(10));

        power.deep_sleep(Duration::from_millis(30));
        let fed = fed_at(&watchdog);
        assert!(fed >= before + Duration::from_millis(30));
        assert!(fed < before + Duration::from_secs(10));
    }
}

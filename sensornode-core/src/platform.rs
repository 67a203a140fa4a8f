use std::time::Duration;

use tracing::error;

use crate::error::Result;

/// Largest timeout the hardware watchdog accepts.
pub const MAX_WATCHDOG_TIMEOUT_MS: u64 = 8_388_607;

pub trait Power {
    /// Hard reset. Does not return on real hardware.
    fn reboot(&mut self);

    fn shutdown(&mut self);

    fn deep_sleep(&mut self, duration: Duration);
}

pub trait Watchdog {
    fn feed(&mut self);
}

/// The wireless link underneath the transport.
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    fn is_connected(&self) -> bool;

    async fn begin(&mut self, ssid: &str, password: &str) -> Result<()>;

    fn disconnect(&mut self);
}

/// Returns the watchdog timeout to arm, or `None` when disabled.
pub fn effective_watchdog_timeout(timeout_ms: u64) -> Option<Duration> {
    match timeout_ms {
        0 => None,
        ms if ms > MAX_WATCHDOG_TIMEOUT_MS => {
            error!(
                "Watchdog timeout {ms} ms exceeds maximum, clamping to {MAX_WATCHDOG_TIMEOUT_MS} ms"
            );
            Some(Duration::from_millis(MAX_WATCHDOG_TIMEOUT_MS))
        }
        ms => Some(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_timeout_clamp() {
        assert_eq!(effective_watchdog_timeout(0), None);
        assert_eq!(
            effective_watchdog_timeout(5000),
            Some(Duration::from_millis(5000))
        );
        assert_eq!(
            effective_watchdog_timeout(10_000_000),
            Some(Duration::from_millis(MAX_WATCHDOG_TIMEOUT_MS))
        );
    }
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServiceLedConfig;
use crate::error::{Error, Result};
use crate::state::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const OFF: Rgb = Rgb(0, 0, 0);
}

/// A single addressable status LED.
pub trait StatusPixel: Send {
    fn write(&mut self, color: Rgb) -> Result<()>;
}

type SharedPixel = Arc<Mutex<Box<dyn StatusPixel>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct LedPattern {
    pub color: Rgb,
    pub blink_pattern: Vec<Duration>,
    /// Full passes over the pattern, 0 repeats forever.
    pub times: u64,
}

impl LedPattern {
    pub fn from_config(entry: &Value) -> Result<Self> {
        let invalid = |reason: &str| Error::Indicator(reason.to_string());

        let color = entry
            .get("color")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("missing color"))?;
        let channels = color
            .iter()
            .map(|c| c.as_u64().and_then(|c| u8::try_from(c).ok()))
            .collect::<Option<Vec<u8>>>()
            .filter(|c| c.len() == 3)
            .ok_or_else(|| invalid("color must be three channels in 0..=255"))?;

        let durations = entry
            .get("blink_pattern")
            .and_then(Value::as_array)
            .filter(|pattern| !pattern.is_empty())
            .ok_or_else(|| invalid("missing or empty blink_pattern"))?;
        let blink_pattern = durations
            .iter()
            .map(|d| {
                d.as_f64()
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .map(Duration::from_secs_f64)
            })
            .collect::<Option<Vec<Duration>>>()
            .ok_or_else(|| invalid("blink_pattern durations must be finite and non-negative"))?;
        if blink_pattern.iter().all(Duration::is_zero) {
            return Err(invalid("blink_pattern has no duration"));
        }

        let times = match entry.get("times") {
            None | Some(Value::Null) => 1,
            Some(times) => times
                .as_u64()
                .ok_or_else(|| invalid("times must be a non-negative integer"))?,
        };

        Ok(Self {
            color: Rgb(channels[0], channels[1], channels[2]),
            blink_pattern,
            times,
        })
    }

    /// One pass: every entry is shown on and then off for its duration.
    pub fn phases(&self) -> impl Iterator<Item = (Rgb, Duration)> + '_ {
        self.blink_pattern
            .iter()
            .flat_map(move |d| [(self.color, *d), (Rgb::OFF, *d)])
    }
}

struct Animation {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the status pixel with at most one animation at a time.
pub struct Indicator {
    pixel: SharedPixel,
    state_leds: BTreeMap<String, Value>,
    current: Option<Animation>,
}

impl Indicator {
    pub fn new(pixel: Box<dyn StatusPixel>, config: &ServiceLedConfig) -> Self {
        if let Some(pin) = config.pin {
            info!("Service LED initialized on pin {pin}");
        }

        Self {
            pixel: Arc::new(Mutex::new(pixel)),
            state_leds: config.state_leds.clone(),
            current: None,
        }
    }

    pub async fn indicate_state(&mut self, state: DeviceState) {
        self.indicate(state.as_str()).await
    }

    /// Starts the animation configured under `name`, replacing any running one.
    ///
    /// Unknown or malformed entries are logged and leave the current animation
    /// untouched.
    pub async fn indicate(&mut self, name: &str) {
        let Some(entry) = self.state_leds.get(name) else {
            info!("No indicator configuration for state '{name}'");
            return;
        };

        let pattern = match LedPattern::from_config(entry) {
            Ok(pattern) => pattern,
            Err(e) => {
                error!("Invalid indicator configuration for state '{name}': {e}");
                return;
            }
        };

        self.stop().await;

        info!(
            "Indicating state '{name}' with color {:?}, pattern {:?}, times {}",
            pattern.color, pattern.blink_pattern, pattern.times
        );

        let token = CancellationToken::new();
        let handle = tokio::spawn(animate(Arc::clone(&self.pixel), pattern, token.clone()));
        self.current = Some(Animation { token, handle });
    }

    /// Cancels the running animation and waits until the pixel is off.
    pub async fn stop(&mut self) {
        if let Some(animation) = self.current.take() {
            debug!("Cancelling ongoing LED animation");
            animation.token.cancel();

            if let Err(e) = animation.handle.await {
                error!("LED animation task failed: {e}");
            }
        }
    }

    pub fn is_animating(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|animation| !animation.handle.is_finished())
    }

    pub fn turn_off(&self) {
        info!("Turning off service LED");
        if let Err(e) = write(&self.pixel, Rgb::OFF) {
            error!("Failed to turn off service LED: {e}");
        }
    }
}

impl Drop for Indicator {
    fn drop(&mut self) {
        if let Some(animation) = self.current.take() {
            animation.token.cancel();
        }
    }
}

fn write(pixel: &SharedPixel, color: Rgb) -> Result<()> {
    let mut pixel = pixel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    pixel.write(color)
}

/// Forces the pixel off when the animation future ends for any reason.
struct PixelOffGuard(SharedPixel);

impl Drop for PixelOffGuard {
    fn drop(&mut self) {
        if let Err(e) = write(&self.0, Rgb::OFF) {
            error!("Failed to turn off service LED: {e}");
        }
    }
}

async fn animate(pixel: SharedPixel, pattern: LedPattern, token: CancellationToken) {
    let _off = PixelOffGuard(Arc::clone(&pixel));

    let mut iteration = 0;
    while pattern.times == 0 || iteration < pattern.times {
        for (color, duration) in pattern.phases() {
            if let Err(e) = write(&pixel, color) {
                error!("LED animation failed: {e}");
                return;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("LED animation cancelled");
                    return;
                }
                _ = tokio::time::sleep(duration) => {}
            }
        }
        iteration += 1;
    }

    info!("LED animation finished");
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::{Instant, sleep};

    use crate::mock::RecordingPixel;

    use super::*;

    const RED: Rgb = Rgb(255, 0, 0);
    const GREEN: Rgb = Rgb(0, 255, 0);

    fn led_config(entries: Value) -> ServiceLedConfig {
        ServiceLedConfig {
            pin: Some(16),
            state_leds: serde_json::from_value(entries).unwrap(),
        }
    }

    fn intervals(writes: &[(Instant, Rgb)]) -> Vec<u128> {
        writes
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).as_millis())
            .collect()
    }

    #[test]
    fn test_pattern_validation() {
        let ok = LedPattern::from_config(&json!({"color": [1, 2, 3], "blink_pattern": [0.5]})).unwrap();
        assert_eq!(ok.times, 1);
        assert_eq!(ok.color, Rgb(1, 2, 3));

        for entry in [
            json!({"blink_pattern": [0.5]}),
            json!({"color": [1, 2], "blink_pattern": [0.5]}),
            json!({"color": [1, 2, 300], "blink_pattern": [0.5]}),
            json!({"color": [1, 2, 3]}),
            json!({"color": [1, 2, 3], "blink_pattern": []}),
            json!({"color": [1, 2, 3], "blink_pattern": [-1.0]}),
            json!({"color": [1, 2, 3], "blink_pattern": [0, 0]}),
            json!({"color": [1, 2, 3], "blink_pattern": [1], "times": -2}),
        ] {
            assert!(LedPattern::from_config(&entry).is_err(), "{entry}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_pattern_timing() {
        let pixel = RecordingPixel::new();
        let config = led_config(json!({
            "ACTIVE": {"color": [255, 0, 0], "blink_pattern": [0.5, 1.0], "times": 2}
        }));
        let mut indicator = Indicator::new(Box::new(pixel.clone()), &config);

        indicator.indicate_state(DeviceState::Active).await;
        sleep(Duration::from_secs(10)).await;

        let writes = pixel.writes();
        let on = writes.iter().filter(|(_, c)| *c == RED).count();
        assert_eq!(on, 4);
        assert_eq!(
            intervals(&writes),
            vec![500, 500, 1000, 1000, 500, 500, 1000, 1000]
        );
        assert_eq!(pixel.last(), Some(Rgb::OFF));
        assert!(!indicator.is_animating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_animation_cancelled_leaves_pixel_off() {
        let pixel = RecordingPixel::new();
        let config = led_config(json!({
            "ERROR": {"color": [255, 0, 0], "blink_pattern": [0.25], "times": 0}
        }));
        let mut indicator = Indicator::new(Box::new(pixel.clone()), &config);

        indicator.indicate_state(DeviceState::Error).await;
        sleep(Duration::from_secs(60)).await;
        assert!(indicator.is_animating());
        assert!(pixel.writes().len() > 200);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(pixel.last(), Some(RED));

        indicator.stop().await;
        assert!(!indicator.is_animating());
        assert_eq!(pixel.last(), Some(Rgb::OFF));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_state_turns_off_before_new_color() {
        let pixel = RecordingPixel::new();
        let config = led_config(json!({
            "STARTUP": {"color": [255, 0, 0], "blink_pattern": [1.0], "times": 0},
            "ACTIVE": {"color": [0, 255, 0], "blink_pattern": [1.0], "times": 1}
        }));
        let mut indicator = Indicator::new(Box::new(pixel.clone()), &config);

        indicator.indicate_state(DeviceState::Startup).await;
        sleep(Duration::from_millis(300)).await;
        indicator.indicate_state(DeviceState::Active).await;
        sleep(Duration::from_secs(5)).await;

        let colors: Vec<Rgb> = pixel.writes().into_iter().map(|(_, c)| c).collect();
        assert_eq!(colors, vec![RED, Rgb::OFF, GREEN, Rgb::OFF, Rgb::OFF]);
        for pair in colors.windows(2) {
            assert!(pair[0] == Rgb::OFF || pair[1] == Rgb::OFF);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_entry_keeps_running_animation() {
        let pixel = RecordingPixel::new();
        let config = led_config(json!({
            "STARTUP": {"color": [255, 0, 0], "blink_pattern": [1.0], "times": 0},
            "ERROR": {"color": [255, 0, 0]}
        }));
        let mut indicator = Indicator::new(Box::new(pixel.clone()), &config);

        indicator.indicate_state(DeviceState::Startup).await;
        indicator.indicate_state(DeviceState::Error).await;
        indicator.indicate_state(DeviceState::Sleeping).await;
        sleep(Duration::from_millis(10)).await;

        assert!(indicator.is_animating());
        assert_eq!(pixel.last(), Some(RED));
    }
}

//! In-memory collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::indicator::{Rgb, StatusPixel};
use crate::platform::{NetworkLink, Power, Watchdog};
use crate::sensor::{Readings, SensorDriver, SensorRegistry};
use crate::transport::{Inbound, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct TransportState {
    connected: bool,
    refuse_connect: bool,
    connect_attempts: usize,
    published: Vec<(String, Vec<u8>)>,
    subscriptions: Vec<String>,
    inbound: VecDeque<Inbound>,
}

/// Records everything published; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let transport = Self::new();
        transport.set_connected(true);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        lock(&self.state).inbound.push_back(Inbound::new(topic, payload));
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    /// Payloads published on `topic`, decoded as JSON.
    pub fn published_json(&self, topic: &str) -> Vec<Value> {
        lock(&self.state)
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if state.refuse_connect {
            return Err(Error::Transport(String::from("connection refused")));
        }

        state.connected = true;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn poll(&mut self) -> Vec<Inbound> {
        lock(&self.state).inbound.drain(..).collect()
    }
}

#[derive(Debug, Default)]
struct PowerState {
    reboots: usize,
    shutdowns: usize,
    sleeps: Vec<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MockPower {
    state: Arc<Mutex<PowerState>>,
}

impl MockPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboots(&self) -> usize {
        lock(&self.state).reboots
    }

    pub fn shutdowns(&self) -> usize {
        lock(&self.state).shutdowns
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }
}

impl Power for MockPower {
    fn reboot(&mut self) {
        lock(&self.state).reboots += 1;
    }

    fn shutdown(&mut self) {
        lock(&self.state).shutdowns += 1;
    }

    fn deep_sleep(&mut self, duration: Duration) {
        lock(&self.state).sleeps.push(duration);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockWatchdog {
    feeds: Arc<Mutex<usize>>,
}

impl MockWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> usize {
        *lock(&self.feeds)
    }
}

impl Watchdog for MockWatchdog {
    fn feed(&mut self) {
        *lock(&self.feeds) += 1;
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    connected: bool,
    /// Remaining `begin` calls that fail before one succeeds; `None` never succeeds.
    failures_left: Option<u32>,
    attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    /// A link that comes up on the first attempt.
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(failures: u32) -> Self {
        let network = Self::default();
        lock(&network.state).failures_left = Some(failures);
        network
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }
}

impl NetworkLink for MockNetwork {
    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn begin(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.attempts += 1;

        match state.failures_left {
            Some(0) => {
                state.connected = true;
                Ok(())
            }
            Some(left) => {
                state.failures_left = Some(left - 1);
                Err(Error::Network(String::from("association failed")))
            }
            None => Err(Error::Network(String::from("network unreachable"))),
        }
    }

    fn disconnect(&mut self) {
        lock(&self.state).connected = false;
    }
}

/// Records every color written together with the (tokio) time of the write.
#[derive(Debug, Clone, Default)]
pub struct RecordingPixel {
    writes: Arc<Mutex<Vec<(Instant, Rgb)>>>,
}

impl RecordingPixel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(Instant, Rgb)> {
        lock(&self.writes).clone()
    }

    pub fn last(&self) -> Option<Rgb> {
        lock(&self.writes).last().map(|(_, color)| *color)
    }
}

impl StatusPixel for RecordingPixel {
    fn write(&mut self, color: Rgb) -> Result<()> {
        lock(&self.writes).push((Instant::now(), color));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DriverState {
    readings: Readings,
    fail_reads: bool,
    fail_initialize: bool,
    self_test: bool,
    reads: usize,
    self_tests: usize,
}

/// Driver returning fixed readings, with switchable failures.
#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    state: Arc<Mutex<DriverState>>,
}

impl MockSensor {
    pub fn new(readings: Readings) -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState {
                readings,
                self_test: true,
                ..Default::default()
            })),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    pub fn fail_initialize(&self, fail: bool) {
        lock(&self.state).fail_initialize = fail;
    }

    pub fn set_self_test(&self, passes: bool) {
        lock(&self.state).self_test = passes;
    }

    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    pub fn self_tests(&self) -> usize {
        lock(&self.state).self_tests
    }
}

impl SensorDriver for MockSensor {
    fn initialize(&mut self) -> Result<()> {
        if lock(&self.state).fail_initialize {
            return Err(Error::Sensor {
                id: String::from("mock"),
                reason: String::from("no response on bus"),
            });
        }
        Ok(())
    }

    fn read_values(&mut self, _editable: &Map<String, Value>) -> Result<Readings> {
        let mut state = lock(&self.state);
        if state.fail_reads {
            return Err(Error::Sensor {
                id: String::from("mock"),
                reason: String::from("read timeout"),
            });
        }

        state.reads += 1;
        Ok(state.readings.clone())
    }

    fn do_self_test(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.self_tests += 1;
        state.self_test
    }
}

/// Registry with a `mock` type whose drivers are looked up by sensor id.
pub fn mock_registry(drivers: &[(&str, MockSensor)]) -> SensorRegistry {
    let drivers: HashMap<String, MockSensor> = drivers
        .iter()
        .map(|(id, sensor)| (id.to_string(), sensor.clone()))
        .collect();

    SensorRegistry::new().with("mock", move |config| {
        drivers
            .get(&config.id)
            .map(|sensor| Box::new(sensor.clone()) as Box<dyn SensorDriver>)
            .ok_or_else(|| Error::sensor(&config.id, "no mock driver registered"))
    })
}

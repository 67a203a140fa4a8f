use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::config::Configuration;
use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::error_handler::{Disposition, ErrorHandler, ErrorPolicy};
use crate::indicator::{Indicator, StatusPixel};
use crate::lifecycle::Lifecycle;
use crate::network::{LinkStatus, WifiManager};
use crate::platform::{NetworkLink, Power, Watchdog};
use crate::sensor::{SensorRegistry, SensorScheduler};
use crate::state::DeviceState;
use crate::state_manager::StateManager;
use crate::system::SystemCommandProcessor;
use crate::transport::{Inbound, Transport};

/// Hardware collaborators the supervisor drives.
pub struct Board<T, N> {
    pub transport: T,
    pub network: N,
    pub power: Box<dyn Power>,
    pub watchdog: Box<dyn Watchdog>,
    pub pixel: Box<dyn StatusPixel>,
}

/// Wires every component together and runs the node.
pub struct Supervisor<T: Transport, N: NetworkLink> {
    config: Configuration,
    transport: T,
    wifi: WifiManager<N>,
    power: Box<dyn Power>,
    watchdog: Box<dyn Watchdog>,
    lifecycle: Lifecycle,
    errors: ErrorHandler,
    scheduler: SensorScheduler,
    system: SystemCommandProcessor,
    registry: SensorRegistry,
    link: LinkStatus,
}

impl<T: Transport, N: NetworkLink> Supervisor<T, N> {
    pub fn new(config: Configuration, board: Board<T, N>, registry: SensorRegistry) -> Self {
        let document = config.get();
        let indicator = Indicator::new(board.pixel, &document.service_led);
        let lifecycle = Lifecycle::new(StateManager::new(indicator, &document.system));

        Self {
            transport: board.transport,
            wifi: WifiManager::new(board.network, &document.wifi),
            power: board.power,
            watchdog: board.watchdog,
            lifecycle,
            errors: ErrorHandler::new(ErrorPolicy::from(&document.system)),
            scheduler: SensorScheduler::new(),
            system: SystemCommandProcessor::new(&document.system),
            registry,
            link: LinkStatus::Degraded,
            config,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn scheduler(&self) -> &SensorScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs startup and then the steady-state loop until a global failure.
    ///
    /// Returns `Ok` once a restart was requested and the error otherwise.
    pub async fn run(&mut self) -> Result<()> {
        if let Err(e) = self.start().await {
            return self.fail("Error during initialization", e).await;
        }

        loop {
            if let Err(e) = self.tick().await {
                return self.fail("Error during main loop", e).await;
            }

            self.idle().await;
        }
    }

    /// Startup sequence, ending in `Active`.
    pub async fn start(&mut self) -> Result<()> {
        self.lifecycle.state_manager().indicator().turn_off();
        self.lifecycle
            .transition_to(DeviceState::Startup, &mut self.transport)
            .await;

        let delay = Duration::from_secs(self.config.get().system.startup_delay_s);
        sleep(delay).await;

        self.initialize_system().await?;

        self.lifecycle
            .transition_to(DeviceState::Active, &mut self.transport)
            .await;
        info!("Startup complete");
        Ok(())
    }

    async fn initialize_system(&mut self) -> Result<()> {
        self.link = self.wifi.connect(self.power.as_mut()).await?;

        match self.link {
            LinkStatus::Connected => self.transport.connect().await?,
            LinkStatus::Degraded => warn!("Skipping broker connection while Wi-Fi is down"),
        }

        let mut ctx = NodeContext::new(
            &mut self.transport,
            &mut self.config,
            self.power.as_mut(),
            &self.errors,
        );
        self.system.initialize(&mut ctx).await;
        self.scheduler
            .initialize_sensors(&mut ctx, &self.registry, Instant::now())
            .await;

        Ok(())
    }

    /// One loop iteration: liveness, connectivity, inbound messages, sensors.
    pub async fn tick(&mut self) -> Result<()> {
        self.watchdog.feed();

        self.link = self.wifi.check_connection(self.power.as_mut()).await?;
        if self.link == LinkStatus::Connected && !self.transport.is_connected() {
            self.reconnect_transport().await;
        }

        for message in self.transport.poll() {
            self.dispatch(message).await;
        }

        let mut ctx = NodeContext::new(
            &mut self.transport,
            &mut self.config,
            self.power.as_mut(),
            &self.errors,
        );
        self.scheduler.update_sensors(&mut ctx, Instant::now()).await;

        Ok(())
    }

    async fn reconnect_transport(&mut self) {
        info!("Broker connection down, reconnecting");

        if let Err(e) = self.transport.connect().await {
            warn!("Broker reconnect failed: {e}");
            return;
        }

        let topics: Vec<String> = self
            .system
            .subscriptions()
            .chain(self.scheduler.subscriptions())
            .map(String::from)
            .collect();

        for topic in topics {
            if let Err(e) = self.transport.subscribe(&topic).await {
                warn!("Failed to resubscribe to {topic}: {e}");
            }
        }
    }

    async fn dispatch(&mut self, message: Inbound) {
        let mut ctx = NodeContext::new(
            &mut self.transport,
            &mut self.config,
            self.power.as_mut(),
            &self.errors,
        );

        if self.system.handle_message(&mut ctx, &message).await {
            return;
        }
        if self
            .scheduler
            .handle_message(&mut ctx, &message, Instant::now())
            .await
        {
            return;
        }

        warn!("Unexpected topic: {}", message.topic);
    }

    /// Waits between loop iterations, sleeping deeply when configured to.
    pub async fn idle(&mut self) {
        let system = &self.config.get().system;
        let loop_interval = Duration::from_secs(system.loop_interval_s);
        let deep_sleep = system
            .power
            .sleep_between_cycles
            .then(|| Duration::from_secs(system.power.deep_sleep_interval_s));

        match deep_sleep {
            Some(duration) => {
                self.lifecycle
                    .transition_to(DeviceState::Sleeping, &mut self.transport)
                    .await;
                self.power.deep_sleep(duration);
                self.lifecycle
                    .transition_to(DeviceState::Active, &mut self.transport)
                    .await;
            }
            None => sleep(loop_interval).await,
        }
    }

    async fn fail(&mut self, context: &str, e: Error) -> Result<()> {
        let message = format!("{context}: {e}");
        error!("{message}");

        self.lifecycle
            .transition_to(DeviceState::GlobalError, &mut self.transport)
            .await;

        match self
            .errors
            .handle_error(&message, &mut self.transport, self.power.as_mut())
            .await
        {
            Disposition::Restarted => Ok(()),
            Disposition::Resumed => Err(e),
        }
    }
}

pub mod config;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod indicator;
pub mod lifecycle;
pub mod message;
pub mod network;
pub mod platform;
pub mod sensor;
pub mod state;
pub mod state_manager;
pub mod supervisor;
pub mod system;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Error, Result};
pub use state::{DeviceState, SensorState};

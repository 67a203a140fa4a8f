mod climate;
mod record;
mod registry;
mod scheduler;

pub use climate::*;
pub use record::*;
pub use registry::*;
pub use scheduler::*;

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One reading: a flat mapping of measurement names to values.
pub type Readings = Map<String, Value>;

/// Hardware-facing half of a sensor.
///
/// State, parameters and publishing live in [`SensorRecord`]; a driver only
/// measures.
pub trait SensorDriver: Send {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reads current values. `editable` carries the live editable parameters.
    fn read_values(&mut self, editable: &Map<String, Value>) -> Result<Readings>;

    fn do_self_test(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Enable,
    Disable,
    SelfTest,
    FactoryReset,
}

impl SensorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorCommand::Enable => "enable",
            SensorCommand::Disable => "disable",
            SensorCommand::SelfTest => "self_test",
            SensorCommand::FactoryReset => "factory_reset",
        }
    }
}

impl FromStr for SensorCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enable" => Ok(SensorCommand::Enable),
            "disable" => Ok(SensorCommand::Disable),
            "self_test" => Ok(SensorCommand::SelfTest),
            "factory_reset" => Ok(SensorCommand::FactoryReset),
            other => Err(Error::Protocol(format!("unsupported command '{other}'"))),
        }
    }
}

impl fmt::Display for SensorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

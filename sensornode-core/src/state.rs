use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Startup,
    Active,
    #[default]
    Inactive,
    Error,
    Sleeping,
    GlobalError,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Startup => "STARTUP",
            DeviceState::Active => "ACTIVE",
            DeviceState::Inactive => "INACTIVE",
            DeviceState::Error => "ERROR",
            DeviceState::Sleeping => "SLEEPING",
            DeviceState::GlobalError => "GLOBAL_ERROR",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorState {
    Active,
    Disabled,
    Error,
}

impl SensorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorState::Active => "ACTIVE",
            SensorState::Disabled => "DISABLED",
            SensorState::Error => "ERROR",
        }
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_match_wire_format() {
        for state in [
            DeviceState::Startup,
            DeviceState::Active,
            DeviceState::Inactive,
            DeviceState::Error,
            DeviceState::Sleeping,
            DeviceState::GlobalError,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }

        assert_eq!(
            serde_json::to_string(&SensorState::Disabled).unwrap(),
            "\"DISABLED\""
        );
        assert_eq!(DeviceState::default(), DeviceState::Inactive);
    }
}

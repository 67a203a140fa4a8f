use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: String,
}

impl StatePayload {
    pub fn new(state: impl ToString) -> Self {
        Self {
            state: state.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub timestamp: String,
}

impl ErrorPayload {
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            timestamp: timestamp(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    pub command: Option<String>,
}

/// Live power settings. Any JSON number is accepted and rounded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerConfigPatch {
    pub deep_sleep_interval_s: Option<f64>,
    pub watchdog_timeout: Option<f64>,
}

impl PowerConfigPatch {
    pub fn deep_sleep_interval_s(&self) -> Result<Option<u64>> {
        whole_non_negative("deep_sleep_interval_s", self.deep_sleep_interval_s)
    }

    /// Watchdog timeout in milliseconds.
    pub fn watchdog_timeout_ms(&self) -> Result<Option<u64>> {
        whole_non_negative("watchdog_timeout", self.watchdog_timeout)
    }
}

fn whole_non_negative(name: &str, value: Option<f64>) -> Result<Option<u64>> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(Error::Protocol(format!(
            "{name} must be a non-negative number, got {v}"
        ))),
        v => Ok(v.map(|v| v.round() as u64)),
    }
}

/// Extracts the `command` field of a command message.
pub fn parse_command(payload: &[u8]) -> Result<String> {
    let message: CommandMessage = serde_json::from_slice(payload)
        .map_err(|e| Error::Protocol(format!("invalid JSON: {e}")))?;

    message
        .command
        .filter(|command| !command.is_empty())
        .ok_or_else(|| Error::Protocol(String::from("no command found in message")))
}

/// Parses a flat key/value configuration message.
pub fn parse_object(payload: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Protocol(format!(
            "configuration is not a mapping: {other}"
        ))),
        Err(e) => Err(Error::Protocol(format!("invalid JSON: {e}"))),
    }
}

/// Wall-clock time as `YYYY-MM-DD HH:MM:SS`, local when the offset is known.
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    now.format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(br#"{"command":"reboot"}"#).unwrap(), "reboot");
        assert!(parse_command(br#"{"other":1}"#).unwrap_err().is_protocol());
        assert!(parse_command(b"not json").unwrap_err().is_protocol());
    }

    #[test]
    fn test_parse_object_rejects_non_mapping() {
        assert!(parse_object(b"[1, 2]").unwrap_err().is_protocol());
        assert_eq!(parse_object(br#"{"a":1}"#).unwrap().len(), 1);
    }
}

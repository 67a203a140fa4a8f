#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown sensor type '{0}'")]
    UnknownSensorType(String),

    #[error("Sensor {id} failed: {reason}")]
    Sensor { id: String, reason: String },

    #[error("Indicator error: {0}")]
    Indicator(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    pub fn sensor(id: impl Into<String>, reason: impl ToString) -> Self {
        Error::Sensor {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Protocol errors are dropped by the receiver, never escalated.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

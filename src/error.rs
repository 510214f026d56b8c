// Error taxonomy for dictionary building, server configuration and startup
use thiserror::Error;

use crate::application::telemetry_server::ServerState;
use crate::domain::measurement::Format;

/// Why a single schema variant was rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaDefect {
    #[error("units must not be empty")]
    EmptyUnits,

    #[error("{bound} must be a finite number, got {value}")]
    NonFiniteBound { bound: &'static str, value: f64 },

    #[error("format '{0:?}' is numeric and requires both min and max")]
    MissingBounds(Format),
}

/// Raised while declaring measurements in a dictionary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("invalid schema for measurement '{measurement}': {reason}")]
    InvalidSchema { measurement: String, reason: String },

    #[error("measurement '{0}' is already registered")]
    DuplicateMeasurement(String),

    #[error("channel key '{channel_key}' is already used by measurement '{existing}'")]
    DuplicateChannelKey { channel_key: String, existing: String },

    #[error("unknown measurement '{0}'")]
    UnknownMeasurement(String),
}

impl SchemaError {
    pub fn invalid(measurement: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            measurement: measurement.into(),
            reason: reason.into(),
        }
    }
}

/// Raised while assembling or validating a `ServerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("dictionary key '{0}' is registered more than once")]
    DuplicateDictionaryKey(String),

    #[error("channel key '{channel_key}' is declared by both '{first}' and '{second}'")]
    DuplicateChannelKey {
        channel_key: String,
        first: String,
        second: String,
    },

    #[error("invalid {field} endpoint '{value}': {reason}")]
    InvalidEndpoint {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("http port and websocket port are both {0}")]
    PortConflict(u16),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ConfigError {
    pub fn endpoint(field: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidEndpoint {
            field,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// Backend a startup step was acquiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Broker,
    WebSocket,
    Http,
    History,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Broker => "broker",
            Backend::WebSocket => "websocket listener",
            Backend::Http => "http listener",
            Backend::History => "history store",
        };
        f.write_str(name)
    }
}

/// Reported by `TelemetryServer::start`. The first failing step wins.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to connect to {backend} at {target}: {reason}")]
    Connect {
        backend: Backend,
        target: String,
        reason: String,
    },

    #[error("failed to bind {backend} on {addr}: {reason}")]
    Bind {
        backend: Backend,
        addr: String,
        reason: String,
    },

    #[error("cannot start a server in state {0:?}")]
    InvalidState(ServerState),
}

impl StartError {
    pub fn connect(backend: Backend, target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            backend,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn bind(backend: Backend, addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::Bind {
            backend,
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }
}

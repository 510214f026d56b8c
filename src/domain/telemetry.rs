// Telemetry data domain models
use serde::{Deserialize, Serialize};

/// One archived sample, as read back from the history store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    #[serde(rename = "timestamp")]
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// Wire payload relayed to clients: `{channelKey, value, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    pub channel_key: String,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundPayload {
    Bare(f64),
    Framed {
        value: f64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl TelemetryFrame {
    pub fn new(channel_key: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            channel_key: channel_key.into(),
            value,
            timestamp,
        }
    }

    /// Decode a broker payload published on `channel_key`. The topic is authoritative
    /// for routing; samples without a timestamp are stamped with `received_at`.
    pub fn decode(channel_key: &str, payload: &[u8], received_at: i64) -> Result<Self, serde_json::Error> {
        let (value, timestamp) = match serde_json::from_slice::<InboundPayload>(payload)? {
            InboundPayload::Bare(value) => (value, None),
            InboundPayload::Framed { value, timestamp } => (value, timestamp),
        };

        Ok(Self::new(channel_key, value, timestamp.unwrap_or(received_at)))
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// Server configuration - endpoints, dictionaries and history target
use crate::domain::dictionary::Dictionary;
use crate::error::ConfigError;
use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WSS_PORT: u16 = 8082;
pub const DEFAULT_BROKER_URL: &str = "mqtt://localhost";
pub const DEFAULT_INFLUX_HOST: &str = "localhost";
pub const DEFAULT_INFLUX_DB: &str = "void";
pub const DEFAULT_INFLUX_PORT: u16 = 8086;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(2000);

pub const BROKER_SCHEMES: [&str; 2] = ["mqtt", "tcp"];
pub const DEFAULT_BROKER_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTarget {
    pub host: String,
    pub db: String,
}

impl HistoryTarget {
    /// Base URL of the archive; bare host names get `http://` and the default port.
    pub fn url(&self) -> Result<Url, ConfigError> {
        let raw = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        };
        let mut url = Url::parse(&raw).map_err(|e| ConfigError::endpoint("history", &self.host, e))?;
        if url.host_str().is_none() {
            return Err(ConfigError::endpoint("history", &self.host, "missing host"));
        }
        if url.port().is_none() && !self.host.contains("://") {
            url.set_port(Some(DEFAULT_INFLUX_PORT))
                .map_err(|_| ConfigError::endpoint("history", &self.host, "cannot carry a port"))?;
        }
        Ok(url)
    }
}

/// Immutable snapshot consumed by `TelemetryServer::new`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub wss_port: u16,
    pub broker_url: String,
    pub dictionaries: Vec<Arc<Dictionary>>,
    pub history: HistoryTarget,
    pub connect_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Cross-check the snapshot without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut keys: HashSet<&str> = HashSet::new();
        for dictionary in &self.dictionaries {
            if !keys.insert(dictionary.key()) {
                return Err(ConfigError::DuplicateDictionaryKey(dictionary.key().to_string()));
            }
        }

        let mut channels: HashMap<&str, &str> = HashMap::new();
        for dictionary in &self.dictionaries {
            for measurement in dictionary.measurements() {
                if let Some(first) = channels.insert(measurement.channel_key.as_str(), dictionary.key()) {
                    return Err(ConfigError::DuplicateChannelKey {
                        channel_key: measurement.channel_key.clone(),
                        first: first.to_string(),
                        second: dictionary.key().to_string(),
                    });
                }
            }
        }

        if self.host.trim().is_empty() || self.host.contains(char::is_whitespace) {
            return Err(ConfigError::endpoint("host", &self.host, "not a valid host name"));
        }
        if self.port == 0 {
            return Err(ConfigError::endpoint("port", "0", "port must be non-zero"));
        }
        if self.wss_port == 0 {
            return Err(ConfigError::endpoint("wss_port", "0", "port must be non-zero"));
        }
        if self.port == self.wss_port {
            return Err(ConfigError::PortConflict(self.port));
        }

        self.broker_endpoint()?;
        self.history.url()?;

        if self.dictionaries.is_empty() {
            tracing::warn!("No dictionaries configured, the server will expose no channels");
        }

        Ok(())
    }

    pub fn broker_endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|e| ConfigError::endpoint("broker", &self.broker_url, e))?;
        if !BROKER_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::endpoint(
                "broker",
                &self.broker_url,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::endpoint("broker", &self.broker_url, "missing host"));
        }
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                wss_port: DEFAULT_WSS_PORT,
                broker_url: DEFAULT_BROKER_URL.to_string(),
                dictionaries: Vec::new(),
                history: HistoryTarget {
                    host: DEFAULT_INFLUX_HOST.to_string(),
                    db: DEFAULT_INFLUX_DB.to_string(),
                },
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn wss_port(mut self, port: u16) -> Self {
        self.config.wss_port = port;
        self
    }

    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    #[cfg(test)]
    pub fn dictionary(mut self, dictionary: Arc<Dictionary>) -> Self {
        self.config.dictionaries.push(dictionary);
        self
    }

    pub fn dictionaries(mut self, dictionaries: impl IntoIterator<Item = Arc<Dictionary>>) -> Self {
        self.config.dictionaries.extend(dictionaries);
        self
    }

    pub fn history(mut self, host: impl Into<String>, db: impl Into<String>) -> Self {
        self.config.history = HistoryTarget {
            host: host.into(),
            db: db.into(),
        };
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

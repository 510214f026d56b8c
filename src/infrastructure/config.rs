use crate::application::server_config::{
    DEFAULT_BROKER_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_INFLUX_DB,
    DEFAULT_INFLUX_HOST, DEFAULT_PORT, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WSS_PORT, ServerConfig,
};
use crate::domain::dictionary::{Dictionary, DictionaryDefinition};
use crate::error::ConfigError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DICTIONARIES_CONFIG: &str = "config/dictionaries";

/// Process environment, read once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct EnvSettings {
    pub host: String,
    pub port: u16,
    pub wss_port: u16,
    pub msgflo_broker: String,
    pub influx_host: String,
    pub influx_db: String,
    pub connect_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub dictionaries_config: String,
}

#[derive(Debug, Deserialize)]
struct DictionariesFile {
    #[serde(default)]
    dictionaries: Vec<DictionaryDefinition>,
}

impl EnvSettings {
    pub fn server_config(&self, dictionaries: Vec<Arc<Dictionary>>) -> ServerConfig {
        ServerConfig::builder()
            .host(&self.host)
            .port(self.port)
            .wss_port(self.wss_port)
            .broker_url(&self.msgflo_broker)
            .history(&self.influx_host, &self.influx_db)
            .dictionaries(dictionaries)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
            .build()
    }
}

pub fn load_env_settings() -> Result<EnvSettings, ConfigError> {
    env_settings_from(config::Environment::default())
}

fn env_settings_from(environment: config::Environment) -> Result<EnvSettings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("host", DEFAULT_HOST)?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("wss_port", DEFAULT_WSS_PORT as i64)?
        .set_default("msgflo_broker", DEFAULT_BROKER_URL)?
        .set_default("influx_host", DEFAULT_INFLUX_HOST)?
        .set_default("influx_db", DEFAULT_INFLUX_DB)?
        .set_default("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT.as_millis() as i64)?
        .set_default("shutdown_timeout_ms", DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as i64)?
        .set_default("dictionaries_config", DEFAULT_DICTIONARIES_CONFIG)?
        .add_source(environment.try_parsing(true))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Load and validate every dictionary declared in the file at `path`.
pub fn load_dictionaries(path: &str) -> Result<Vec<Arc<Dictionary>>, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;

    dictionaries_from(settings)
}

fn dictionaries_from(settings: config::Config) -> Result<Vec<Arc<Dictionary>>, ConfigError> {
    let file: DictionariesFile = settings.try_deserialize()?;
    file.dictionaries
        .into_iter()
        .map(|definition| -> Result<Arc<Dictionary>, ConfigError> {
            Ok(Arc::new(Dictionary::try_from(definition)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let mut map = config::Map::new();
        for (key, value) in vars {
            map.insert(key.to_string(), value.to_string());
        }
        config::Environment::default().source(Some(map))
    }

    fn parse(source: &str) -> Result<Vec<Arc<Dictionary>>, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        dictionaries_from(settings)
    }

    #[test]
    fn test_env_defaults() {
        let settings = env_settings_from(environment(&[])).unwrap();
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.wss_port, 8082);
        assert_eq!(settings.msgflo_broker, "mqtt://localhost");
        assert_eq!(settings.influx_host, "localhost");
        assert_eq!(settings.influx_db, "void");
        assert_eq!(settings.dictionaries_config, "config/dictionaries");
    }

    #[test]
    fn test_env_overrides() {
        let settings = env_settings_from(environment(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "9000"),
            ("WSS_PORT", "9002"),
            ("MSGFLO_BROKER", "mqtt://broker.local:1884"),
            ("INFLUX_DB", "flight"),
            ("CONNECT_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        let config = settings.server_config(Vec::new());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.wss_port, 9002);
        assert_eq!(config.broker_url, "mqtt://broker.local:1884");
        assert_eq!(config.history.host, "localhost");
        assert_eq!(config.history.db, "flight");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_env_rejects_bad_port() {
        assert!(env_settings_from(environment(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn test_shipped_dictionaries_file() {
        let dictionaries = load_dictionaries("config/dictionaries").unwrap();
        let keys: Vec<&str> = dictionaries.iter().map(|d| d.key()).collect();
        assert_eq!(keys, vec!["void_av", "void_payload"]);

        let av = &dictionaries[0];
        assert_eq!(av.display_name(), "Void AV Bay");
        let names: Vec<&str> = av.list_measurements().collect();
        assert_eq!(names, vec!["altitude", "latitude", "longitude"]);
        assert_eq!(av.measurement_for_channel("av_altitude").unwrap().name, "altitude");

        let latitude = &av.lookup("latitude").unwrap()[0];
        assert_eq!((latitude.min(), latitude.max()), (Some(90.0), Some(90.0)));
        assert_eq!(av.warnings().len(), 1);

        let config = ServerConfig::builder().dictionaries(dictionaries).build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_with_invalid_schema_is_rejected() {
        let source = r#"
            [[dictionaries]]
            name = "Void AV Bay"
            key = "void_av"

            [[dictionaries.measurements]]
            name = "altitude"
            channel = "av_altitude"
            values = [{ format = "float", min = 0, max = 35000 }]
        "#;
        let err = parse(source).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Schema(SchemaError::InvalidSchema { ref measurement, .. }) if measurement == "altitude"
        ));
    }

    #[test]
    fn test_file_with_duplicate_measurement_is_rejected() {
        let source = r#"
            [[dictionaries]]
            name = "Void AV Bay"
            key = "void_av"

            [[dictionaries.measurements]]
            name = "altitude"
            channel = "av_altitude"
            values = [{ units = "meters", format = "float", min = 0, max = 35000 }]

            [[dictionaries.measurements]]
            name = "altitude"
            channel = "av_altitude_2"
            values = [{ units = "meters", format = "float", min = 0, max = 35000 }]
        "#;
        assert!(matches!(
            parse(source),
            Err(ConfigError::Schema(SchemaError::DuplicateMeasurement(_)))
        ));
    }
}

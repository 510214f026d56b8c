// Dictionary domain model - named collection of measurement schemas
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::measurement::{MeasurementSchema, RangeWarning, RawSchema};
use crate::error::SchemaError;

/// A named telemetry quantity and its encodings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    #[serde(rename = "key")]
    pub channel_key: String,
    #[serde(rename = "values")]
    pub variants: Vec<MeasurementSchema>,
}

impl Measurement {
    /// The variant used for range checks on routed values.
    pub fn primary(&self) -> &MeasurementSchema {
        &self.variants[0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaWarning {
    pub measurement: String,
    pub variant: usize,
    pub warning: RangeWarning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dictionary {
    #[serde(rename = "name")]
    display_name: String,
    key: String,
    measurements: Vec<Measurement>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
    #[serde(skip)]
    by_channel: HashMap<String, usize>,
}

impl Dictionary {
    pub fn new(display_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            key: key.into(),
            measurements: Vec::new(),
            by_name: HashMap::new(),
            by_channel: HashMap::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register `variants` under `name`, routed on the broker as `channel_key`.
    /// Nothing is changed when the call fails.
    pub fn add_measurement(
        &mut self,
        name: impl Into<String>,
        channel_key: impl Into<String>,
        variants: Vec<MeasurementSchema>,
    ) -> Result<&Measurement, SchemaError> {
        let name = name.into();
        let channel_key = channel_key.into();

        if self.by_name.contains_key(&name) {
            return Err(SchemaError::DuplicateMeasurement(name));
        }
        if let Some(&index) = self.by_channel.get(&channel_key) {
            return Err(SchemaError::DuplicateChannelKey {
                channel_key,
                existing: self.measurements[index].name.clone(),
            });
        }
        if name.trim().is_empty() {
            return Err(SchemaError::invalid(name, "measurement name must not be empty"));
        }
        if channel_key.trim().is_empty() {
            return Err(SchemaError::invalid(name, "channel key must not be empty"));
        }
        if variants.is_empty() {
            return Err(SchemaError::invalid(name, "at least one schema variant is required"));
        }

        let index = self.measurements.len();
        self.by_name.insert(name.clone(), index);
        self.by_channel.insert(channel_key.clone(), index);
        self.measurements.push(Measurement {
            name,
            channel_key,
            variants,
        });

        Ok(&self.measurements[index])
    }

    /// Same as `add_measurement`, validating loosely-typed variants first.
    pub fn add_raw_measurement(
        &mut self,
        name: impl Into<String>,
        channel_key: impl Into<String>,
        raw: Vec<RawSchema>,
    ) -> Result<&Measurement, SchemaError> {
        let name = name.into();
        let variants = raw
            .into_iter()
            .map(|schema| schema.into_schema(&name))
            .collect::<Result<Vec<_>, _>>()?;
        self.add_measurement(name, channel_key, variants)
    }

    /// Measurement names in registration order.
    pub fn list_measurements(&self) -> impl Iterator<Item = &str> + '_ {
        self.measurements.iter().map(|m| m.name.as_str())
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn lookup(&self, name: &str) -> Result<&[MeasurementSchema], SchemaError> {
        self.by_name
            .get(name)
            .map(|&index| self.measurements[index].variants.as_slice())
            .ok_or_else(|| SchemaError::UnknownMeasurement(name.to_string()))
    }

    pub fn measurement_for_channel(&self, channel_key: &str) -> Option<&Measurement> {
        self.by_channel
            .get(channel_key)
            .map(|&index| &self.measurements[index])
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Every suspicious range declared in this dictionary.
    pub fn warnings(&self) -> Vec<SchemaWarning> {
        self.measurements
            .iter()
            .flat_map(|m| {
                m.variants
                    .iter()
                    .enumerate()
                    .filter_map(move |(variant, schema)| {
                        schema.range_warning().map(|warning| SchemaWarning {
                            measurement: m.name.clone(),
                            variant,
                            warning,
                        })
                    })
            })
            .collect()
    }
}

/// File form of a dictionary, see `config/dictionaries.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct DictionaryDefinition {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub measurements: Vec<MeasurementDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementDefinition {
    pub name: String,
    pub channel: String,
    #[serde(default)]
    pub values: Vec<RawSchema>,
}

impl TryFrom<DictionaryDefinition> for Dictionary {
    type Error = SchemaError;

    fn try_from(definition: DictionaryDefinition) -> Result<Self, Self::Error> {
        let mut dictionary = Dictionary::new(definition.name, definition.key);
        for measurement in definition.measurements {
            dictionary.add_raw_measurement(measurement.name, measurement.channel, measurement.values)?;
        }
        Ok(dictionary)
    }
}

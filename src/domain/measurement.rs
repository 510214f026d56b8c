// Measurement schema domain model
use serde::{Deserialize, Serialize};

use crate::error::{SchemaDefect, SchemaError};

/// Encoding tag of a telemetry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Float,
    Integer,
    String,
    Enum,
    Utc,
}

impl Format {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "float" => Some(Format::Float),
            "integer" | "int" => Some(Format::Integer),
            "string" => Some(Format::String),
            "enum" => Some(Format::Enum),
            "utc" => Some(Format::Utc),
            _ => None,
        }
    }

    /// Numeric formats must carry `min`/`max` bounds.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Format::Float | Format::Integer)
    }
}

/// Non-fatal problem with a declared value range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeWarning {
    Degenerate { value: f64 },
    Inverted { min: f64, max: f64 },
}

impl std::fmt::Display for RangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeWarning::Degenerate { value } => {
                write!(f, "degenerate range: min and max are both {}", value)
            }
            RangeWarning::Inverted { min, max } => {
                write!(f, "inverted range: min {} is greater than max {}", min, max)
            }
        }
    }
}

/// Encoding and validity constraints of one telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementSchema {
    units: String,
    format: Format,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
}

impl MeasurementSchema {
    pub fn new(
        units: impl Into<String>,
        format: Format,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self, SchemaDefect> {
        let units = units.into();
        if units.trim().is_empty() {
            return Err(SchemaDefect::EmptyUnits);
        }

        for (bound, value) in [("min", min), ("max", max)] {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(SchemaDefect::NonFiniteBound { bound, value });
                }
            }
        }

        if format.is_numeric() && (min.is_none() || max.is_none()) {
            return Err(SchemaDefect::MissingBounds(format));
        }

        Ok(Self {
            units,
            format,
            min,
            max,
        })
    }

    /// Shorthand for a float measurement, the common case for avionics channels.
    #[cfg(test)]
    pub fn float(units: impl Into<String>, min: f64, max: f64) -> Result<Self, SchemaDefect> {
        Self::new(units, Format::Float, Some(min), Some(max))
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn range_warning(&self) -> Option<RangeWarning> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max => Some(RangeWarning::Degenerate { value: min }),
            (Some(min), Some(max)) if min > max => Some(RangeWarning::Inverted { min, max }),
            _ => None,
        }
    }

    /// Whether `value` lies outside a well-formed range. Misconfigured ranges never
    /// flag values, since the bound itself is suspect.
    pub fn is_out_of_range(&self, value: f64) -> bool {
        if self.range_warning().is_some() {
            return false;
        }
        match (self.min, self.max) {
            (Some(min), Some(max)) => value < min || value > max,
            _ => false,
        }
    }
}

/// Loosely-typed schema as it arrives from a dictionary file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchema {
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub min: Option<serde_json::Value>,
    #[serde(default)]
    pub max: Option<serde_json::Value>,
}

impl RawSchema {
    pub fn into_schema(self, measurement: &str) -> Result<MeasurementSchema, SchemaError> {
        let units = self
            .units
            .ok_or_else(|| SchemaError::invalid(measurement, "missing required field 'units'"))?;
        let tag = self
            .format
            .ok_or_else(|| SchemaError::invalid(measurement, "missing required field 'format'"))?;
        let format = Format::parse(&tag)
            .ok_or_else(|| SchemaError::invalid(measurement, format!("unknown format '{}'", tag)))?;

        let min = numeric_bound(measurement, "min", self.min, format)?;
        let max = numeric_bound(measurement, "max", self.max, format)?;

        MeasurementSchema::new(units, format, min, max)
            .map_err(|defect| SchemaError::invalid(measurement, defect.to_string()))
    }
}

fn numeric_bound(
    measurement: &str,
    label: &str,
    raw: Option<serde_json::Value>,
    format: Format,
) -> Result<Option<f64>, SchemaError> {
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => match value.as_f64() {
            Some(number) => Ok(Some(number)),
            None if format.is_numeric() => Err(SchemaError::invalid(
                measurement,
                format!("{} must be numeric, got {}", label, value),
            )),
            // Non-numeric formats carry no meaningful bounds.
            None => Ok(None),
        },
    }
}

// Domain layer - telemetry dictionaries and wire payloads
pub mod dictionary;
pub mod measurement;
pub mod telemetry;

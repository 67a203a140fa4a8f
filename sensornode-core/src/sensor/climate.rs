use serde_json::{Map, Value, json};
use tracing::error;

use crate::error::Result;
use crate::message::timestamp;

use super::{Readings, SensorDriver};

/// Raw temperature/humidity source.
pub trait ClimateProbe: Send {
    /// Returns `(degrees Celsius, relative humidity in percent)`.
    fn measure(&mut self) -> Result<(f64, f64)>;
}

/// Temperature/humidity sensor reporting in the units selected by the
/// `unit_temperature` and `unit_humidity` editable parameters.
pub struct ClimateSensor<P> {
    probe: P,
}

impl<P: ClimateProbe> ClimateSensor<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

fn unit<'a>(editable: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    editable.get(key).and_then(Value::as_str).unwrap_or(default)
}

pub fn convert_temperature(celsius: f64, unit: &str) -> f64 {
    match unit {
        "Fahrenheit" => celsius * 9.0 / 5.0 + 32.0,
        "Kelvin" => celsius + 273.15,
        _ => celsius,
    }
}

pub fn convert_humidity(percentage: f64, unit: &str) -> f64 {
    match unit {
        "fraction" => percentage / 100.0,
        "per_mille" => percentage * 10.0,
        _ => percentage,
    }
}

impl<P: ClimateProbe> SensorDriver for ClimateSensor<P> {
    fn read_values(&mut self, editable: &Map<String, Value>) -> Result<Readings> {
        let (celsius, percentage) = self.probe.measure().inspect_err(|e| {
            error!("Climate probe read error: {e}");
        })?;

        let unit_temperature = unit(editable, "unit_temperature", "Celsius");
        let unit_humidity = unit(editable, "unit_humidity", "percentage");

        let mut readings = Readings::new();
        readings.insert(
            "temperature".into(),
            json!(convert_temperature(celsius, unit_temperature)),
        );
        readings.insert(
            "humidity".into(),
            json!(convert_humidity(percentage, unit_humidity)),
        );
        readings.insert("unit_temperature".into(), json!(unit_temperature));
        readings.insert("unit_humidity".into(), json!(unit_humidity));
        readings.insert("datetime".into(), json!(timestamp()));

        Ok(readings)
    }

    fn do_self_test(&mut self) -> bool {
        self.probe.measure().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;

    use super::*;

    struct FixedProbe(Option<(f64, f64)>);

    impl ClimateProbe for FixedProbe {
        fn measure(&mut self) -> Result<(f64, f64)> {
            self.0.ok_or_else(|| Error::sensor("climate", "checksum mismatch"))
        }
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(convert_temperature(100.0, "Fahrenheit"), 212.0);
        assert_eq!(convert_temperature(0.0, "Kelvin"), 273.15);
        assert_eq!(convert_temperature(21.5, "Celsius"), 21.5);
        assert_eq!(convert_humidity(45.0, "fraction"), 0.45);
        assert_eq!(convert_humidity(45.0, "per_mille"), 450.0);
        assert_eq!(convert_humidity(45.0, "unknown"), 45.0);
    }

    #[test]
    fn test_read_values_uses_editable_units() {
        let mut sensor = ClimateSensor::new(FixedProbe(Some((0.0, 50.0))));
        let mut editable = Map::new();
        editable.insert("unit_temperature".into(), json!("Kelvin"));
        editable.insert("unit_humidity".into(), json!("fraction"));

        let readings = sensor.read_values(&editable).unwrap();

        assert_eq!(readings["temperature"], json!(273.15));
        assert_eq!(readings["humidity"], json!(0.5));
        assert_eq!(readings["unit_temperature"], json!("Kelvin"));
        assert!(readings["datetime"].is_string());
    }

    #[test]
    fn test_probe_failure_propagates() {
        let mut sensor = ClimateSensor::new(FixedProbe(None));

        assert!(sensor.read_values(&Map::new()).is_err());
        assert!(!sensor.do_self_test());
    }
}

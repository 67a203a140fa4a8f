use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensornode_core::message::timestamp;
use sensornode_core::sensor::{ClimateProbe, Readings, SensorDriver};
use sensornode_core::{Error, Result};
use serde_json::{Map, Value, json};
use tokio::time::Instant;

/// Load resistance on the gas sensor board, kOhm.
pub const RLOAD: f64 = 10.0;
/// Calibration resistance at atmospheric CO2 level, kOhm.
pub const RZERO: f64 = 76.63;
pub const PARA: f64 = 116.6020682;
pub const PARB: f64 = 2.769034857;
/// Atmospheric CO2 level used for calibration, ppm.
pub const ATMOCO2: f64 = 397.13;

const ADC_MAX: f64 = 1023.0;

pub fn simulated_humidity(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    if (0.3..=0.7).contains(&day_fraction) {
        (radians.sin().max(0.0) * 25.0) + 65.0
    } else {
        (radians.cos().max(0.0) * 30.0) + 60.0
    }
}

pub fn simulated_temperature(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;
    radians.sin().max(0.0) * 20.0 + 10.0
}

/// Indoor CO2 rising through the occupied part of the day.
pub fn simulated_co2(day_fraction: f64) -> f64 {
    if (0.35..=0.75).contains(&day_fraction) {
        let occupancy = ((day_fraction - 0.35) / 0.4 * PI).sin();
        ATMOCO2 + 20.0 + occupancy * 600.0
    } else {
        ATMOCO2 + 20.0
    }
}

/// Converts a raw ADC sample into sensor resistance (kOhm).
pub fn resistance_from_adc(value: u16) -> Option<f64> {
    (value != 0).then(|| (ADC_MAX / f64::from(value) - 1.0) * RLOAD)
}

pub fn ppm_from_resistance(resistance: f64, rzero: f64) -> f64 {
    PARA * (resistance / rzero).powf(-PARB)
}

/// Resistance the sensor would show if the air held [`ATMOCO2`].
pub fn rzero_from_resistance(resistance: f64) -> f64 {
    resistance * (ATMOCO2 / PARA).powf(1.0 / PARB)
}

/// Temperature and humidity dependence of the sensing element.
pub fn correction_factor(celsius: f64, humidity: f64) -> f64 {
    const CORA: f64 = 0.00035;
    const CORB: f64 = 0.02718;
    const CORC: f64 = 1.39538;
    const CORD: f64 = 0.0018;
    const CORE: f64 = -0.003333333;
    const CORF: f64 = -0.001923077;
    const CORG: f64 = 1.130128205;

    if celsius < 20.0 {
        CORA * celsius * celsius - CORB * celsius + CORC - (humidity - 33.0) * CORD
    } else {
        CORE * celsius + CORF * humidity + CORG
    }
}

/// Position inside a simulated day, in `[0, 1)`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedDay {
    started: Instant,
    length: Duration,
}

impl SimulatedDay {
    pub fn new(length: Duration) -> Self {
        Self {
            started: Instant::now(),
            length: length.max(Duration::from_secs(1)),
        }
    }

    pub fn fraction(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        let length = self.length.as_secs_f64();
        (elapsed % length) / length
    }
}

pub struct SimulatedClimateProbe {
    day: SimulatedDay,
    rng: StdRng,
}

impl SimulatedClimateProbe {
    pub fn new(day: SimulatedDay) -> Self {
        Self {
            day,
            rng: StdRng::from_os_rng(),
        }
    }
}

impl ClimateProbe for SimulatedClimateProbe {
    fn measure(&mut self) -> Result<(f64, f64)> {
        let fraction = self.day.fraction();
        let celsius = simulated_temperature(fraction) + self.rng.random_range(-0.3..0.3);
        let humidity = simulated_humidity(fraction) + self.rng.random_range(-1.0..1.0);

        Ok((celsius, humidity.clamp(0.0, 100.0)))
    }
}

/// MQ135-style gas sensor fed by a simulated ADC.
///
/// The `rzero` editable parameter overrides the calibration resistance.
pub struct SimulatedGasSensor {
    id: String,
    day: SimulatedDay,
    rng: StdRng,
}

impl SimulatedGasSensor {
    pub fn new(id: impl Into<String>, day: SimulatedDay) -> Self {
        Self {
            id: id.into(),
            day,
            rng: StdRng::from_os_rng(),
        }
    }

    fn sample_adc(&mut self) -> u16 {
        let fraction = self.day.fraction();
        let ppm = simulated_co2(fraction) + self.rng.random_range(-5.0..5.0);
        let resistance = RZERO * (ppm / PARA).powf(-1.0 / PARB);
        let factor = correction_factor(simulated_temperature(fraction), simulated_humidity(fraction));
        let adc = ADC_MAX / (resistance * factor / RLOAD + 1.0);

        adc.round().clamp(0.0, ADC_MAX) as u16
    }
}

impl SensorDriver for SimulatedGasSensor {
    fn read_values(&mut self, editable: &Map<String, Value>) -> Result<Readings> {
        let rzero = editable
            .get("rzero")
            .and_then(Value::as_f64)
            .filter(|value| *value > 0.0)
            .unwrap_or(RZERO);

        let adc = self.sample_adc();
        let resistance = resistance_from_adc(adc)
            .ok_or_else(|| Error::sensor(&self.id, "no signal on analog input"))?;

        let fraction = self.day.fraction();
        let corrected = resistance
            / correction_factor(simulated_temperature(fraction), simulated_humidity(fraction));

        let mut readings = Readings::new();
        readings.insert("co2_ppm".into(), json!(ppm_from_resistance(corrected, rzero).round()));
        readings.insert("resistance_kohm".into(), json!(resistance));
        readings.insert("rzero".into(), json!(rzero_from_resistance(corrected)));
        readings.insert("datetime".into(), json!(timestamp()));

        Ok(readings)
    }

    fn do_self_test(&mut self) -> bool {
        resistance_from_adc(self.sample_adc()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_resistance_reads_atmospheric_level() {
        let resistance = RZERO * (ATMOCO2 / PARA).powf(-1.0 / PARB);

        assert!((ppm_from_resistance(resistance, RZERO) - ATMOCO2).abs() < 1e-6);
        assert!((rzero_from_resistance(resistance) - RZERO).abs() < 1e-6);
    }

    #[test]
    fn test_zero_adc_has_no_resistance() {
        assert_eq!(resistance_from_adc(0), None);
        assert_eq!(resistance_from_adc(1023), Some(0.0));
    }

    #[test]
    fn test_correction_factor_near_one_at_reference() {
        let factor = correction_factor(20.0, 33.0);
        assert!((factor - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_daily_curves_stay_in_range() {
        for step in 0..100 {
            let fraction = step as f64 / 100.0;

            let humidity = simulated_humidity(fraction);
            assert!((0.0..=100.0).contains(&humidity));

            let celsius = simulated_temperature(fraction);
            assert!((10.0..=30.0).contains(&celsius));

            assert!(simulated_co2(fraction) >= ATMOCO2);
        }
    }

    #[tokio::test]
    async fn test_gas_sensor_reports_plausible_ppm() {
        let mut sensor = SimulatedGasSensor::new("gas", SimulatedDay::new(Duration::from_secs(60)));

        let readings = sensor.read_values(&Map::new()).unwrap();
        let ppm = readings["co2_ppm"].as_f64().unwrap();

        assert!((300.0..=1200.0).contains(&ppm), "ppm = {ppm}");
        assert!(readings.contains_key("datetime"));
        assert!(sensor.do_self_test());
    }
}

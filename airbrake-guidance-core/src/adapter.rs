use core::fmt;

use heapless::Vec;
use icao_isa::calculate_isa_altitude;
use icao_units::si::Pascals;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::{
    measurement::{Measurement, Quantity, SensorId},
    sensor::{Frame, MAX_VALUES_PER_SAMPLE, RawValue, Sensor, SensorError, SensorKind},
};

pub const MAX_SENSORS: usize = 8;
pub const MAX_MEASUREMENTS: usize = MAX_SENSORS * MAX_VALUES_PER_SAMPLE;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// samples older than this (relative to the cycle time) are invalid
    pub stale_after_us: u64,
    /// consecutive cycles without a valid sample before a sensor is reported faulty
    pub fault_after_invalid_cycles: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            stale_after_us: 250_000,
            fault_after_invalid_cycles: 20,
        }
    }
}

/// Whether the bias corrector runs on a sensor while on the pad.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasPolicy {
    Raw,
    CorrectOnPad,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Registered,
    Active,
    Excluded,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    InitFailed {
        sensor: SensorId,
        error: SensorError,
    },
    PersistentlyInvalid {
        sensor: SensorId,
        cycles: u32,
    },
}

impl SensorFault {
    pub fn sensor(&self) -> SensorId {
        match self {
            Self::InitFailed { sensor, .. } | Self::PersistentlyInvalid { sensor, .. } => *sensor,
        }
    }
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed { sensor, error } => {
                write!(f, "sensor {} failed to initialize: {}", sensor.0, error)
            }
            Self::PersistentlyInvalid { sensor, cycles } => {
                write!(f, "sensor {} invalid for {} cycles", sensor.0, cycles)
            }
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at most {} sensors can be registered", MAX_SENSORS)
    }
}

struct SensorSlot<'a> {
    sensor: &'a mut dyn Sensor,
    id: SensorId,
    bias_policy: BiasPolicy,
    status: ChannelStatus,
    last_timestamp_us: Option<u64>,
    invalid_streak: u32,
    fault_reported: bool,
}

/// Turns raw driver samples into normalized, validity-tagged measurements.
///
/// Pressure becomes ISA altitude, body-frame acceleration is rotated into
/// the earth frame with the latest attitude (identity until one arrives),
/// angular rate becomes rad/s.
pub struct MeasurementAdapter<'a> {
    config: AdapterConfig,
    slots: Vec<SensorSlot<'a>, MAX_SENSORS>,
    attitude: UnitQuaternion<f32>,
    attitude_us: Option<u64>,
    attitude_stale: bool,
}

impl<'a> MeasurementAdapter<'a> {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            attitude: UnitQuaternion::identity(),
            attitude_us: None,
            attitude_stale: false,
        }
    }

    pub fn register(
        &mut self,
        sensor: &'a mut dyn Sensor,
        bias_policy: BiasPolicy,
    ) -> Result<SensorId, RegistryFull> {
        let id = SensorId(self.slots.len() as u8);
        self.slots
            .push(SensorSlot {
                sensor,
                id,
                bias_policy,
                status: ChannelStatus::Registered,
                last_timestamp_us: None,
                invalid_streak: 0,
                fault_reported: false,
            })
            .map_err(|_| RegistryFull)?;
        Ok(id)
    }

    /// Initializes every registered sensor once. Sensors that fail are
    /// excluded from all later cycles. Sensors with a pad bias policy are
    /// told to start bias correction.
    pub fn init_all(&mut self) -> Vec<SensorFault, MAX_SENSORS> {
        let mut faults = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.status != ChannelStatus::Registered {
                continue;
            }
            match slot.sensor.init() {
                Ok(()) => {
                    log_info!("sensor {} ({}) initialized", slot.id.0, slot.sensor.name());
                    slot.status = ChannelStatus::Active;
                    if slot.bias_policy == BiasPolicy::CorrectOnPad {
                        slot.sensor.set_bias_correction_mode(true);
                    }
                }
                Err(error) => {
                    log_error!(
                        "sensor {} ({}) failed to initialize: {}",
                        slot.id.0,
                        slot.sensor.name(),
                        error
                    );
                    slot.status = ChannelStatus::Excluded;
                    let _ = faults.push(SensorFault::InitFailed {
                        sensor: slot.id,
                        error,
                    });
                }
            }
        }
        faults
    }

    /// Polls every active sensor and appends its normalized measurements
    /// to `out`. Returns the faults raised this cycle.
    pub fn acquire(
        &mut self,
        now_us: u64,
        out: &mut Vec<Measurement, MAX_MEASUREMENTS>,
    ) -> Vec<SensorFault, MAX_SENSORS> {
        let mut faults = Vec::new();
        let config = &self.config;
        let attitude = &mut self.attitude;
        let attitude_us = &mut self.attitude_us;

        for slot in self.slots.iter_mut() {
            if slot.status != ChannelStatus::Active {
                continue;
            }

            let sample = slot.sensor.poll();
            let fresh = slot
                .last_timestamp_us
                .is_none_or(|last| sample.timestamp_us > last);
            let recent = now_us.saturating_sub(sample.timestamp_us) <= config.stale_after_us;
            if fresh {
                slot.last_timestamp_us = Some(sample.timestamp_us);
            }
            let sample_valid = sample.valid && fresh && recent;

            // attitude first so acceleration in the same sample uses it
            if sample_valid {
                for value in sample.values.iter() {
                    if let RawValue::Attitude(q) = value {
                        if q.coords.iter().all(|c| c.is_finite()) {
                            *attitude = *q;
                            *attitude_us = Some(sample.timestamp_us);
                        }
                    }
                }
            }

            let mut any_valid = false;
            for value in sample.values.iter() {
                let quantity = normalize(value, attitude);
                let mut measurement = Measurement::new(slot.id, quantity, sample.timestamp_us);
                if !(sample_valid && quantity.is_finite()) {
                    measurement = measurement.invalidated();
                }
                any_valid |= measurement.valid;
                if out.push(measurement).is_err() {
                    log_warn!("measurement buffer full, dropping sensor {}", slot.id.0);
                }
            }

            if any_valid {
                if slot.fault_reported {
                    log_info!("sensor {} ({}) recovered", slot.id.0, slot.sensor.name());
                }
                slot.invalid_streak = 0;
                slot.fault_reported = false;
            } else {
                slot.invalid_streak = slot.invalid_streak.saturating_add(1);
                if !slot.fault_reported
                    && slot.invalid_streak >= config.fault_after_invalid_cycles
                {
                    log_warn!(
                        "sensor {} ({}) invalid for {} cycles",
                        slot.id.0,
                        slot.sensor.name(),
                        slot.invalid_streak
                    );
                    slot.fault_reported = true;
                    let _ = faults.push(SensorFault::PersistentlyInvalid {
                        sensor: slot.id,
                        cycles: slot.invalid_streak,
                    });
                }
            }
        }

        self.check_attitude_age(now_us);
        faults
    }

    fn check_attitude_age(&mut self, now_us: u64) {
        let Some(updated_us) = self.attitude_us else {
            return;
        };
        let stale = now_us.saturating_sub(updated_us) > self.config.stale_after_us;
        if stale && !self.attitude_stale {
            log_warn!(
                "no attitude since {} us, holding the last one for body accelerations",
                updated_us
            );
        } else if !stale && self.attitude_stale {
            log_info!("attitude updates resumed");
        }
        self.attitude_stale = stale;
    }

    pub fn set_bias_correction_mode(&mut self, sensor: SensorId, enabled: bool) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == sensor) {
            if slot.status == ChannelStatus::Active {
                slot.sensor.set_bias_correction_mode(enabled);
            }
        }
    }

    /// Active sensors that run bias correction on the pad.
    pub fn pad_corrected_sensors(&self) -> Vec<SensorId, MAX_SENSORS> {
        self.slots
            .iter()
            .filter(|s| {
                s.status == ChannelStatus::Active && s.bias_policy == BiasPolicy::CorrectOnPad
            })
            .map(|s| s.id)
            .collect()
    }

    /// First active sensor of the given kind.
    pub fn first_of_kind(&self, kind: SensorKind) -> Option<SensorId> {
        self.slots
            .iter()
            .find(|s| s.status == ChannelStatus::Active && s.sensor.kind() == kind)
            .map(|s| s.id)
    }

    pub fn status(&self, sensor: SensorId) -> Option<ChannelStatus> {
        self.slots.iter().find(|s| s.id == sensor).map(|s| s.status)
    }

    pub fn name(&self, sensor: SensorId) -> Option<&'static str> {
        self.slots
            .iter()
            .find(|s| s.id == sensor)
            .map(|s| s.sensor.name())
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == ChannelStatus::Active)
            .count()
    }

    pub fn registered_count(&self) -> usize {
        self.slots.len()
    }

    pub fn attitude(&self) -> &UnitQuaternion<f32> {
        &self.attitude
    }

    /// An attitude has been received but none recently.
    pub fn attitude_is_stale(&self) -> bool {
        self.attitude_stale
    }
}

/// ISA pressure altitude above mean sea level in meters.
pub fn pressure_altitude(pressure_pa: f32) -> f32 {
    calculate_isa_altitude(Pascals(pressure_pa as f64)).0 as f32
}

fn normalize(value: &RawValue, attitude: &UnitQuaternion<f32>) -> Quantity {
    match *value {
        RawValue::Pressure(pa) => {
            if !(pa.is_finite() && pa > 0.0) {
                Quantity::PressureAltitude(f32::NAN)
            } else {
                Quantity::PressureAltitude(pressure_altitude(pa))
            }
        }
        RawValue::Acceleration { frame, value } => match frame {
            Frame::Body => Quantity::LinearAcceleration(attitude.transform_vector(&value)),
            Frame::Earth => Quantity::LinearAcceleration(value),
        },
        RawValue::AngularRate(deg_per_s) => {
            Quantity::AngularRate(deg_per_s.map(|d| d.to_radians()))
        }
        RawValue::MagneticField(field) => Quantity::MagneticField(field),
        RawValue::Attitude(q) => Quantity::Attitude(q),
        RawValue::Gnss {
            altitude_asl,
            vertical_velocity,
        } => Quantity::Gnss {
            altitude: altitude_asl,
            vertical_velocity,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorSample;
    use crate::tests::init_logger;
    use approx::assert_relative_eq;
    use core::f32::consts::FRAC_PI_2;
    use nalgebra::Vector3;

    struct FakeSensor {
        kind: SensorKind,
        init_result: Result<(), SensorError>,
        next: Option<SensorSample>,
        bias_mode: Option<bool>,
    }

    impl FakeSensor {
        fn new(kind: SensorKind) -> Self {
            Self {
                kind,
                init_result: Ok(()),
                next: None,
                bias_mode: None,
            }
        }
    }

    impl Sensor for FakeSensor {
        fn kind(&self) -> SensorKind {
            self.kind
        }

        fn name(&self) -> &'static str {
            "fake"
        }

        fn init(&mut self) -> Result<(), SensorError> {
            self.init_result
        }

        fn poll(&mut self) -> SensorSample {
            self.next.clone().unwrap_or(SensorSample::invalid(0))
        }

        fn set_bias_correction_mode(&mut self, enabled: bool) {
            self.bias_mode = Some(enabled);
        }
    }

    #[test]
    fn sea_level_pressure_is_zero_altitude() {
        assert_relative_eq!(pressure_altitude(101_325.0), 0.0, epsilon = 0.5);
        // ISA: 89 874.6 Pa at 1000 m
        assert_relative_eq!(pressure_altitude(89_874.6), 1000.0, epsilon = 1.0);
    }

    #[test]
    fn converts_pressure_and_rate_units() {
        init_logger();
        let mut baro = FakeSensor::new(SensorKind::Barometer);
        baro.next = Some(
            SensorSample::new(1_000)
                .with(RawValue::Pressure(101_325.0))
                .with(RawValue::AngularRate(Vector3::new(180.0, 0.0, 0.0))),
        );

        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut baro, BiasPolicy::Raw).unwrap();
        assert!(adapter.init_all().is_empty());

        let mut out = Vec::new();
        adapter.acquire(1_000, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.valid));
        match out[1].quantity {
            Quantity::AngularRate(rate) => {
                assert_relative_eq!(rate.x, core::f32::consts::PI, epsilon = 1e-5)
            }
            _ => panic!("expected angular rate"),
        }
    }

    #[test]
    fn rotates_body_acceleration_with_latest_attitude() {
        init_logger();
        // pitched 90 degrees: body x points up
        let attitude = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2);
        let mut imu = FakeSensor::new(SensorKind::Imu);
        imu.next = Some(
            SensorSample::new(10)
                .with(RawValue::Attitude(attitude))
                .with(RawValue::Acceleration {
                    frame: Frame::Body,
                    value: Vector3::new(9.8, 0.0, 0.0),
                }),
        );

        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut imu, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(10, &mut out);
        let accel = out
            .iter()
            .find_map(|m| match m.quantity {
                Quantity::LinearAcceleration(a) => Some(a),
                _ => None,
            })
            .unwrap();
        assert_relative_eq!(accel.z, 9.8, epsilon = 1e-4);
        assert_relative_eq!(accel.x, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn attitude_held_and_flagged_when_source_goes_quiet() {
        init_logger();
        let attitude = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2);
        let mut ahrs = FakeSensor::new(SensorKind::Attitude);
        ahrs.next = Some(SensorSample::new(10).with(RawValue::Attitude(attitude)));

        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut ahrs, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(10, &mut out);
        assert!(!adapter.attitude_is_stale());

        // same timestamp again: no fresh attitude
        adapter.acquire(100_000, &mut out);
        assert!(!adapter.attitude_is_stale());

        adapter.acquire(300_000, &mut out);
        assert!(adapter.attitude_is_stale());
        assert_eq!(*adapter.attitude(), attitude);
    }

    #[test]
    fn body_acceleration_passes_through_without_attitude() {
        let mut imu = FakeSensor::new(SensorKind::Imu);
        imu.next = Some(SensorSample::new(10).with(RawValue::Acceleration {
            frame: Frame::Body,
            value: Vector3::new(0.0, 0.0, 9.8),
        }));
        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut imu, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(10, &mut out);
        assert_eq!(
            out[0].quantity,
            Quantity::LinearAcceleration(Vector3::new(0.0, 0.0, 9.8))
        );
    }

    #[test]
    fn repeated_timestamp_is_invalid() {
        let mut baro = FakeSensor::new(SensorKind::Barometer);
        baro.next = Some(SensorSample::new(5_000).with(RawValue::Pressure(100_000.0)));
        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut baro, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(5_000, &mut out);
        assert!(out[0].valid);

        out.clear();
        adapter.acquire(105_000, &mut out);
        assert!(!out[0].valid);
    }

    #[test]
    fn old_sample_is_stale() {
        let mut baro = FakeSensor::new(SensorKind::Barometer);
        baro.next = Some(SensorSample::new(0).with(RawValue::Pressure(100_000.0)));
        let mut adapter = MeasurementAdapter::new(AdapterConfig {
            stale_after_us: 100_000,
            ..Default::default()
        });
        adapter.register(&mut baro, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(200_000, &mut out);
        assert!(!out[0].valid);
    }

    #[test]
    fn driver_invalid_flag_and_bad_pressure_are_invalid() {
        let mut baro = FakeSensor::new(SensorKind::Barometer);
        baro.next = Some(SensorSample::new(1).with(RawValue::Pressure(-5.0)));
        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        adapter.register(&mut baro, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        adapter.acquire(1, &mut out);
        assert!(!out[0].valid);
    }

    #[test]
    fn failed_init_excludes_sensor() {
        init_logger();
        let mut bad = FakeSensor::new(SensorKind::Gnss);
        bad.init_result = Err(SensorError::NotResponding);
        bad.next = Some(SensorSample::new(1).with(RawValue::Pressure(100_000.0)));
        let mut good = FakeSensor::new(SensorKind::Barometer);
        good.next = Some(SensorSample::new(1).with(RawValue::Pressure(100_000.0)));

        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        let bad_id = adapter.register(&mut bad, BiasPolicy::Raw).unwrap();
        adapter.register(&mut good, BiasPolicy::CorrectOnPad).unwrap();

        let faults = adapter.init_all();
        assert_eq!(
            faults.as_slice(),
            &[SensorFault::InitFailed {
                sensor: bad_id,
                error: SensorError::NotResponding
            }]
        );
        assert_eq!(adapter.status(bad_id), Some(ChannelStatus::Excluded));
        assert_eq!(adapter.active_count(), 1);

        let mut out = Vec::new();
        adapter.acquire(1, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out.iter().all(|m| m.sensor != bad_id));
        drop(adapter);
        assert_eq!(good.bias_mode, Some(true));
        assert_eq!(bad.bias_mode, None);
    }

    #[test]
    fn persistent_invalidity_raises_one_fault_until_recovery() {
        init_logger();
        let mut baro = FakeSensor::new(SensorKind::Barometer);
        let mut adapter = MeasurementAdapter::new(AdapterConfig {
            fault_after_invalid_cycles: 3,
            ..Default::default()
        });
        let id = adapter.register(&mut baro, BiasPolicy::Raw).unwrap();
        adapter.init_all();

        let mut out = Vec::new();
        let mut fault_count = 0;
        for cycle in 0..10u64 {
            let faults = adapter.acquire(cycle * 100_000, &mut out);
            fault_count += faults.len();
            if !faults.is_empty() {
                assert_eq!(cycle, 2);
                assert_eq!(faults[0].sensor(), id);
            }
        }
        assert_eq!(fault_count, 1);
    }

    #[test]
    fn registry_is_bounded() {
        let mut sensors: [FakeSensor; MAX_SENSORS + 1] =
            core::array::from_fn(|_| FakeSensor::new(SensorKind::Barometer));
        let mut adapter = MeasurementAdapter::new(AdapterConfig::default());
        let mut results = std::vec::Vec::new();
        for sensor in sensors.iter_mut() {
            results.push(adapter.register(sensor, BiasPolicy::Raw));
        }
        assert!(results[..MAX_SENSORS].iter().all(|r| r.is_ok()));
        assert_eq!(results[MAX_SENSORS], Err(RegistryFull));
    }
}

use core::fmt;

use heapless::Vec;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A single poll never carries more quantities than this,
/// e.g. an IMU reports acceleration + angular rate.
pub const MAX_VALUES_PER_SAMPLE: usize = 3;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    Barometer,
    Imu,
    Magnetometer,
    Gnss,
    Attitude,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Body,
    /// ENU, z up
    Earth,
}

/// Physical quantity exactly as the driver produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    /// Pa
    Pressure(f32),
    /// m/s^2, specific force (reads +1g upwards when at rest)
    Acceleration { frame: Frame, value: Vector3<f32> },
    /// deg/s, body frame
    AngularRate(Vector3<f32>),
    /// body frame, unit is up to the driver
    MagneticField(Vector3<f32>),
    /// rotation from body frame to earth frame
    Attitude(UnitQuaternion<f32>),
    Gnss {
        /// m
        altitude_asl: f32,
        /// m/s, positive up
        vertical_velocity: Option<f32>,
    },
}

#[derive(Debug, Clone)]
pub struct SensorSample {
    pub timestamp_us: u64,
    pub valid: bool,
    pub values: Vec<RawValue, MAX_VALUES_PER_SAMPLE>,
}

impl SensorSample {
    pub fn new(timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            valid: true,
            values: Vec::new(),
        }
    }

    pub fn invalid(timestamp_us: u64) -> Self {
        Self {
            timestamp_us,
            valid: false,
            values: Vec::new(),
        }
    }

    /// Values past `MAX_VALUES_PER_SAMPLE` are dropped.
    pub fn with(mut self, value: RawValue) -> Self {
        if self.values.push(value).is_err() {
            log_warn!("sensor sample full, dropping value");
        }
        self
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    NotResponding,
    UnexpectedIdentity,
    Bus,
    Configuration,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotResponding => write!(f, "sensor not responding"),
            Self::UnexpectedIdentity => write!(f, "unexpected chip identity"),
            Self::Bus => write!(f, "bus error"),
            Self::Configuration => write!(f, "failed to configure sensor"),
        }
    }
}

/// Capability set every sensor driver exposes to the guidance core.
///
/// Drivers own their transport; the core never sees registers or buses.
/// `poll` must not block: a driver without a fresh sample returns its last
/// one (same timestamp) or an invalid sample.
pub trait Sensor {
    fn kind(&self) -> SensorKind;

    fn name(&self) -> &'static str;

    fn init(&mut self) -> Result<(), SensorError>;

    fn poll(&mut self) -> SensorSample;

    /// Drivers that keep their own offset state can react to this,
    /// the core applies its own correction regardless.
    fn set_bias_correction_mode(&mut self, _enabled: bool) {}
}

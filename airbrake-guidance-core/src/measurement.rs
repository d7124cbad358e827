use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorId(pub u8);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    PressureAltitude,
    LinearAcceleration,
    AngularRate,
    MagneticField,
    Attitude,
    Gnss,
}

/// Normalized physical quantity, SI units, earth frame where a frame matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    /// m
    PressureAltitude(f32),
    /// m/s^2 specific force, ENU earth frame
    LinearAcceleration(Vector3<f32>),
    /// rad/s, body frame
    AngularRate(Vector3<f32>),
    MagneticField(Vector3<f32>),
    /// body to earth
    Attitude(UnitQuaternion<f32>),
    Gnss {
        /// m
        altitude: f32,
        /// m/s, positive up
        vertical_velocity: Option<f32>,
    },
}

impl Quantity {
    pub fn kind(&self) -> QuantityKind {
        match self {
            Self::PressureAltitude(_) => QuantityKind::PressureAltitude,
            Self::LinearAcceleration(_) => QuantityKind::LinearAcceleration,
            Self::AngularRate(_) => QuantityKind::AngularRate,
            Self::MagneticField(_) => QuantityKind::MagneticField,
            Self::Attitude(_) => QuantityKind::Attitude,
            Self::Gnss { .. } => QuantityKind::Gnss,
        }
    }

    /// Offset-correctable components packed into a 3-vector.
    /// Attitude has no additive offset and returns `None`.
    pub fn components(&self) -> Option<Vector3<f32>> {
        match *self {
            Self::PressureAltitude(altitude) => Some(Vector3::new(altitude, 0.0, 0.0)),
            Self::LinearAcceleration(v) | Self::AngularRate(v) | Self::MagneticField(v) => Some(v),
            Self::Attitude(_) => None,
            Self::Gnss {
                altitude,
                vertical_velocity,
            } => Some(Vector3::new(
                altitude,
                vertical_velocity.unwrap_or(0.0),
                0.0,
            )),
        }
    }

    /// Inverse of `components`: subtract `offset` from the packed components.
    pub fn offset_by(&self, offset: &Vector3<f32>) -> Self {
        match *self {
            Self::PressureAltitude(altitude) => Self::PressureAltitude(altitude - offset.x),
            Self::LinearAcceleration(v) => Self::LinearAcceleration(v - offset),
            Self::AngularRate(v) => Self::AngularRate(v - offset),
            Self::MagneticField(v) => Self::MagneticField(v - offset),
            Self::Attitude(q) => Self::Attitude(q),
            Self::Gnss {
                altitude,
                vertical_velocity,
            } => Self::Gnss {
                altitude: altitude - offset.x,
                vertical_velocity: vertical_velocity.map(|v| v - offset.y),
            },
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::PressureAltitude(altitude) => altitude.is_finite(),
            Self::LinearAcceleration(v) | Self::AngularRate(v) | Self::MagneticField(v) => {
                v.iter().all(|c| c.is_finite())
            }
            Self::Attitude(q) => q.coords.iter().all(|c| c.is_finite()),
            Self::Gnss {
                altitude,
                vertical_velocity,
            } => altitude.is_finite() && vertical_velocity.is_none_or(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub sensor: SensorId,
    pub quantity: Quantity,
    pub timestamp_us: u64,
    /// invalid measurements never reach the filter's correction step
    pub valid: bool,
    /// true once the bias corrector has subtracted a formed estimate
    pub bias_corrected: bool,
}

impl Measurement {
    pub fn new(sensor: SensorId, quantity: Quantity, timestamp_us: u64) -> Self {
        Self {
            sensor,
            quantity,
            timestamp_us,
            valid: true,
            bias_corrected: false,
        }
    }

    pub fn invalidated(mut self) -> Self {
        self.valid = false;
        self
    }
}

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

mod fusion_filter;

pub use fusion_filter::FusionFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterTuning {
    /// m/s^3, white jerk driving [h, v, a]
    pub jerk_noise_std: f32,
    /// m/s^2 per sqrt(s), random walk of the accelerometer bias
    pub accel_bias_walk_std: f32,
    /// m^2
    pub r_baro: f32,
    /// m^2
    pub r_gnss_altitude: f32,
    /// (m/s)^2
    pub r_gnss_velocity: f32,
    /// (m/s^2)^2
    pub r_accel: f32,
    pub initial_velocity_variance: f32,
    pub initial_acceleration_variance: f32,
    pub initial_accel_bias_variance: f32,
    /// baro updates are skipped above this Mach number, `None` disables the lockout
    pub baro_lockout_mach: Option<f32>,
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self {
            jerk_noise_std: 50.0,
            accel_bias_walk_std: 0.02,
            r_baro: 1.0,
            r_gnss_altitude: 25.0,
            r_gnss_velocity: 0.25,
            r_accel: 0.25,
            initial_velocity_variance: 1.0,
            initial_acceleration_variance: 1.0,
            initial_accel_bias_variance: 0.25,
            baro_lockout_mach: Some(0.8),
        }
    }
}

/// Outcome of feeding one measurement to the filter.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Updated,
    Seeded,
    SkippedInvalid,
    SkippedLockout,
    /// the quantity is not part of the vertical model
    Unobserved,
    SingularInnovation,
}

impl FilterStatus {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Updated | Self::Seeded)
    }
}

/// Read-only snapshot of the filter, altitude above the pad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedState {
    pub time_us: u64,
    /// m AGL
    pub altitude: f32,
    /// m/s
    pub vertical_velocity: f32,
    /// m/s^2, kinematic (gravity removed)
    pub vertical_acceleration: f32,
    /// m/s^2
    pub accel_bias: f32,
    pub covariance: Matrix4<f32>,
    pub seeded: bool,
}

impl FusedState {
    pub fn altitude_variance(&self) -> f32 {
        self.covariance[(0, 0)]
    }

    pub fn velocity_variance(&self) -> f32 {
        self.covariance[(1, 1)]
    }
}

use nalgebra::{Matrix4, Vector4};

use crate::{
    bias::BiasCorrector,
    estimator::{FilterStatus, FilterTuning, FusedState},
    measurement::{Measurement, Quantity},
    utils::{STANDARD_GRAVITY, approximate_speed_of_sound},
};

fn h_altitude() -> Vector4<f32> {
    Vector4::new(1.0, 0.0, 0.0, 0.0)
}

fn h_velocity() -> Vector4<f32> {
    Vector4::new(0.0, 1.0, 0.0, 0.0)
}

fn h_accelerometer() -> Vector4<f32> {
    Vector4::new(0.0, 0.0, 1.0, 1.0)
}

/// Altitude variance before the first altitude measurement arrives.
const UNSEEDED_ALTITUDE_VARIANCE: f32 = 1.0e4;

/// Linear Kalman filter over the vertical channel.
///
/// State vector x = [ h, v, a, b_a ]ᵀ  (m AGL, m s⁻¹, m s⁻², m s⁻²)
///
/// Constant-acceleration process model with white jerk on [h, v, a] and a
/// random walk on the accelerometer bias b_a:
///
/// F = ⎡1  dt  dt²/2  0⎤
///     ⎢0  1   dt     0⎥
///     ⎢0  0   1      0⎥
///     ⎣0  0   0      1⎦
///
/// Measurements are applied one scalar at a time:
///   baro / GNSS altitude  z = h
///   GNSS vertical speed   z = v
///   accelerometer         z = f_up - g = a + b_a
#[derive(Debug, Clone)]
pub struct FusionFilter {
    tuning: FilterTuning,
    /// Current state estimate
    x: Vector4<f32>,
    /// Estimate covariance
    p: Matrix4<f32>,
    /// State-transition matrix
    f: Matrix4<f32>,
    /// Process-noise covariance
    q: Matrix4<f32>,
    /// Nominal cycle period, s
    dt: f32,
    seeded: bool,
    time_us: Option<u64>,
    launch_site_altitude_asl: f32,
}

impl FusionFilter {
    pub fn new(tuning: &FilterTuning, dt: f32, launch_site_altitude_asl: f32) -> Self {
        let (f, q) = transition(tuning, dt);

        Self {
            tuning: tuning.clone(),
            x: Vector4::zeros(),
            p: initial_covariance(tuning),
            f,
            q,
            dt,
            seeded: false,
            time_us: None,
            launch_site_altitude_asl,
        }
    }

    /// Forces the state, e.g. to start from a known flight condition.
    pub fn seed_state(&mut self, altitude: f32, vertical_velocity: f32, vertical_acceleration: f32) {
        self.x = Vector4::new(altitude, vertical_velocity, vertical_acceleration, 0.0);
        self.p = initial_covariance(&self.tuning);
        self.p[(0, 0)] = self.tuning.r_baro;
        self.seeded = true;
    }

    pub fn launch_site_altitude(&self) -> f32 {
        self.launch_site_altitude_asl
    }

    /// Datum subtracted from raw ASL altitudes that have no frozen offset.
    pub fn set_launch_site_altitude(&mut self, launch_site_altitude_asl: f32) {
        self.launch_site_altitude_asl = launch_site_altitude_asl;
    }

    /// Propagate to `time_us` and stamp the state with it. Steps by the
    /// nominal period unless more than one period has passed since the
    /// last prediction.
    pub fn predict(&mut self, time_us: u64) {
        let elapsed = self
            .time_us
            .map(|last| time_us.saturating_sub(last) as f32 / 1e6)
            .filter(|elapsed| *elapsed > self.dt);

        let (f, q) = match elapsed {
            Some(elapsed) => {
                log_debug!("late cycle, propagating {} s", elapsed);
                transition(&self.tuning, elapsed)
            }
            None => (self.f, self.q),
        };

        // x̂₋ = F x̂
        self.x = f * self.x;

        // P₋ = F P Fᵀ + Q
        self.p = f * self.p * f.transpose() + q;
        self.symmetrize();
        self.time_us = Some(time_us);
    }

    /// Fuses one measurement. Measurements that were not bias corrected
    /// get the corrector's frozen offset removed, or the launch site
    /// altitude when they carry a raw ASL altitude.
    pub fn correct(&mut self, measurement: &Measurement, bias: &BiasCorrector) -> FilterStatus {
        if !measurement.valid {
            return FilterStatus::SkippedInvalid;
        }

        match self.to_pad_frame(measurement, bias) {
            Quantity::PressureAltitude(altitude) => {
                if self.baro_locked_out() {
                    log_trace!("baro locked out at v={}", self.x[1]);
                    return FilterStatus::SkippedLockout;
                }
                self.observe_altitude(altitude, self.tuning.r_baro)
            }
            Quantity::Gnss {
                altitude,
                vertical_velocity,
            } => {
                let status = self.observe_altitude(altitude, self.tuning.r_gnss_altitude);
                match vertical_velocity {
                    Some(v) if status.applied() => {
                        let velocity_status =
                            self.scalar_update(&h_velocity(), v, self.tuning.r_gnss_velocity);
                        if velocity_status.applied() { status } else { velocity_status }
                    }
                    _ => status,
                }
            }
            Quantity::LinearAcceleration(specific_force) => self.scalar_update(
                &h_accelerometer(),
                specific_force.z - STANDARD_GRAVITY,
                self.tuning.r_accel,
            ),
            Quantity::AngularRate(_) | Quantity::MagneticField(_) | Quantity::Attitude(_) => {
                FilterStatus::Unobserved
            }
        }
    }

    pub fn state(&self) -> FusedState {
        FusedState {
            time_us: self.time_us.unwrap_or(0),
            altitude: self.x[0],
            vertical_velocity: self.x[1],
            vertical_acceleration: self.x[2],
            accel_bias: self.x[3],
            covariance: self.p,
            seeded: self.seeded,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    fn to_pad_frame(&self, measurement: &Measurement, bias: &BiasCorrector) -> Quantity {
        if measurement.bias_corrected {
            return measurement.quantity;
        }
        if let Some(offset) = bias.frozen_offset(measurement.sensor, measurement.quantity.kind()) {
            return measurement.quantity.offset_by(&offset);
        }
        match measurement.quantity {
            Quantity::PressureAltitude(altitude) => {
                Quantity::PressureAltitude(altitude - self.launch_site_altitude_asl)
            }
            Quantity::Gnss {
                altitude,
                vertical_velocity,
            } => Quantity::Gnss {
                altitude: altitude - self.launch_site_altitude_asl,
                vertical_velocity,
            },
            quantity => quantity,
        }
    }

    fn baro_locked_out(&self) -> bool {
        if !self.seeded {
            return false;
        }
        self.tuning.baro_lockout_mach.is_some_and(|mach| {
            let speed_of_sound =
                approximate_speed_of_sound(self.x[0] + self.launch_site_altitude_asl);
            libm::fabsf(self.x[1]) > mach * speed_of_sound
        })
    }

    fn observe_altitude(&mut self, altitude: f32, variance: f32) -> FilterStatus {
        if self.seeded {
            return self.scalar_update(&h_altitude(), altitude, variance);
        }

        // first altitude pins h directly, its variance becomes P_hh
        self.x[0] = altitude;
        for i in 0..4 {
            self.p[(0, i)] = 0.0;
            self.p[(i, 0)] = 0.0;
        }
        self.p[(0, 0)] = variance;
        self.seeded = true;
        log_info!("filter seeded at altitude {}", altitude);
        FilterStatus::Seeded
    }

    fn scalar_update(&mut self, h: &Vector4<f32>, z: f32, r: f32) -> FilterStatus {
        // Innovation y = z - H x̂₋
        let y = z - h.dot(&self.x);

        // Innovation covariance S = H P₋ Hᵀ + R
        let ph = self.p * h;
        let s = h.dot(&ph) + r;
        if !(s.is_finite() && s > f32::EPSILON) || !y.is_finite() {
            log_warn!("singular innovation, s={}, y={}", s, y);
            return FilterStatus::SingularInnovation;
        }

        // Kalman gain K = P₋ Hᵀ S⁻¹
        let k = ph / s;

        // State update x̂ = x̂₋ + K y
        self.x += k * y;

        // Joseph form P = (I - K H) P₋ (I - K H)ᵀ + K R Kᵀ
        let i_kh = Matrix4::identity() - k * h.transpose();
        self.p = i_kh * self.p * i_kh.transpose() + k * k.transpose() * r;
        self.symmetrize();
        FilterStatus::Updated
    }

    fn symmetrize(&mut self) {
        self.p = 0.5 * (self.p + self.p.transpose());
    }
}

/// State transition F and process noise Q for a step of `dt` seconds.
fn transition(tuning: &FilterTuning, dt: f32) -> (Matrix4<f32>, Matrix4<f32>) {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let f = Matrix4::new(
        1.0, dt, 0.5 * dt2, 0.0, //
        0.0, 1.0, dt, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    );

    let jerk = tuning.jerk_noise_std * tuning.jerk_noise_std;
    let walk = tuning.accel_bias_walk_std * tuning.accel_bias_walk_std;
    let q = Matrix4::new(
        dt3 * dt2 / 20.0, dt2 * dt2 / 8.0, dt3 / 6.0, 0.0, //
        dt2 * dt2 / 8.0, dt3 / 3.0, dt2 / 2.0, 0.0, //
        dt3 / 6.0, dt2 / 2.0, dt, 0.0, //
        0.0, 0.0, 0.0, 0.0,
    ) * jerk
        + Matrix4::from_diagonal(&Vector4::new(0.0, 0.0, 0.0, walk * dt));
    (f, q)
}

fn initial_covariance(tuning: &FilterTuning) -> Matrix4<f32> {
    Matrix4::from_diagonal(&Vector4::new(
        UNSEEDED_ALTITUDE_VARIANCE,
        tuning.initial_velocity_variance,
        tuning.initial_acceleration_variance,
        tuning.initial_accel_bias_variance,
    ))
}

use airbrake_guidance_core::{Frame, RawValue, Sensor, SensorError, SensorKind, SensorSample};
use log::{debug, info};
use nalgebra::{UnitQuaternion, Vector3};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, NormalError};

use crate::physics::SharedTruth;

/// Standard atmosphere pressure (Pa) at an altitude ASL, troposphere only.
pub fn isa_pressure(altitude_asl: f32) -> f32 {
    101_325.0 * (1.0 - 2.255_77e-5 * altitude_asl).powf(5.255_88)
}

/// Init outcome and the log of bias mode requests every simulated driver keeps.
#[derive(Debug, Default)]
struct DriverState {
    init_error: Option<SensorError>,
    bias_correction: bool,
}

impl DriverState {
    fn init(&self, name: &str) -> Result<(), SensorError> {
        match self.init_error {
            Some(error) => Err(error),
            None => {
                info!("{} initialized", name);
                Ok(())
            }
        }
    }

    fn set_bias_correction_mode(&mut self, name: &str, enabled: bool) {
        if self.bias_correction != enabled {
            debug!("{} bias correction {}", name, if enabled { "on" } else { "off" });
        }
        self.bias_correction = enabled;
    }
}

pub struct SimulatedBarometer {
    name: &'static str,
    truth: SharedTruth,
    rng: StdRng,
    noise: Normal<f32>,
    /// Pa
    offset: f32,
    driver: DriverState,
}

impl SimulatedBarometer {
    pub fn new(
        name: &'static str,
        truth: &SharedTruth,
        seed: u64,
        noise_pa: f32,
        offset_pa: f32,
    ) -> Result<Self, NormalError> {
        Ok(Self {
            name,
            truth: truth.clone(),
            rng: StdRng::seed_from_u64(seed),
            noise: Normal::new(0.0, noise_pa)?,
            offset: offset_pa,
            driver: DriverState::default(),
        })
    }
}

impl Sensor for SimulatedBarometer {
    fn kind(&self) -> SensorKind {
        SensorKind::Barometer
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.driver.init(self.name)
    }

    fn poll(&mut self) -> SensorSample {
        let truth = self.truth.get();
        let pressure =
            isa_pressure(truth.altitude_asl()) + self.offset + self.noise.sample(&mut self.rng);
        SensorSample::new(truth.time_us).with(RawValue::Pressure(pressure))
    }

    fn set_bias_correction_mode(&mut self, enabled: bool) {
        self.driver.set_bias_correction_mode(self.name, enabled);
    }
}

/// Strapdown IMU mounted with its z axis along the rocket's long axis.
pub struct SimulatedImu {
    name: &'static str,
    truth: SharedTruth,
    rng: StdRng,
    accel_noise: Normal<f32>,
    gyro_noise: Normal<f32>,
    /// m/s^2, body z
    accel_bias: f32,
    driver: DriverState,
}

impl SimulatedImu {
    pub fn new(
        name: &'static str,
        truth: &SharedTruth,
        seed: u64,
        accel_noise: f32,
        accel_bias: f32,
        gyro_noise: f32,
    ) -> Result<Self, NormalError> {
        Ok(Self {
            name,
            truth: truth.clone(),
            rng: StdRng::seed_from_u64(seed),
            accel_noise: Normal::new(0.0, accel_noise)?,
            gyro_noise: Normal::new(0.0, gyro_noise)?,
            accel_bias,
            driver: DriverState::default(),
        })
    }

    pub fn failing(mut self, error: SensorError) -> Self {
        self.driver.init_error = Some(error);
        self
    }
}

impl Sensor for SimulatedImu {
    fn kind(&self) -> SensorKind {
        SensorKind::Imu
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.driver.init(self.name)
    }

    fn poll(&mut self) -> SensorSample {
        let truth = self.truth.get();
        let rng = &mut self.rng;
        let acceleration = Vector3::new(
            self.accel_noise.sample(rng),
            self.accel_noise.sample(rng),
            truth.specific_force() + self.accel_bias + self.accel_noise.sample(rng),
        );
        let angular_rate = Vector3::new(
            self.gyro_noise.sample(rng),
            self.gyro_noise.sample(rng),
            self.gyro_noise.sample(rng),
        );

        SensorSample::new(truth.time_us)
            .with(RawValue::Acceleration {
                frame: Frame::Body,
                value: acceleration,
            })
            .with(RawValue::AngularRate(angular_rate))
    }

    fn set_bias_correction_mode(&mut self, enabled: bool) {
        self.driver.set_bias_correction_mode(self.name, enabled);
    }
}

/// Attitude and heading reference: the rocket flies straight up, so the
/// reported attitude is identity plus a little tilt noise.
pub struct SimulatedAhrs {
    name: &'static str,
    truth: SharedTruth,
    rng: StdRng,
    /// rad
    tilt_noise: Normal<f32>,
    driver: DriverState,
}

impl SimulatedAhrs {
    pub fn new(
        name: &'static str,
        truth: &SharedTruth,
        seed: u64,
        tilt_noise_deg: f32,
    ) -> Result<Self, NormalError> {
        Ok(Self {
            name,
            truth: truth.clone(),
            rng: StdRng::seed_from_u64(seed),
            tilt_noise: Normal::new(0.0, tilt_noise_deg.to_radians())?,
            driver: DriverState::default(),
        })
    }
}

impl Sensor for SimulatedAhrs {
    fn kind(&self) -> SensorKind {
        SensorKind::Attitude
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.driver.init(self.name)
    }

    fn poll(&mut self) -> SensorSample {
        let truth = self.truth.get();
        let roll = self.tilt_noise.sample(&mut self.rng);
        let pitch = self.tilt_noise.sample(&mut self.rng);
        let attitude = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        // roughly the field at 43N, body frame
        let field = attitude.inverse_transform_vector(&Vector3::new(0.0, 0.18, -0.52));

        SensorSample::new(truth.time_us)
            .with(RawValue::Attitude(attitude))
            .with(RawValue::MagneticField(field))
    }

    fn set_bias_correction_mode(&mut self, enabled: bool) {
        self.driver.set_bias_correction_mode(self.name, enabled);
    }
}

pub struct SimulatedGnss {
    name: &'static str,
    truth: SharedTruth,
    rng: StdRng,
    altitude_noise: Normal<f32>,
    velocity_noise: Normal<f32>,
    fix_time_us: u64,
    driver: DriverState,
}

impl SimulatedGnss {
    pub fn new(
        name: &'static str,
        truth: &SharedTruth,
        seed: u64,
        altitude_noise: f32,
        velocity_noise: f32,
        fix_time_us: u64,
    ) -> Result<Self, NormalError> {
        Ok(Self {
            name,
            truth: truth.clone(),
            rng: StdRng::seed_from_u64(seed),
            altitude_noise: Normal::new(0.0, altitude_noise)?,
            velocity_noise: Normal::new(0.0, velocity_noise)?,
            fix_time_us,
            driver: DriverState::default(),
        })
    }
}

impl Sensor for SimulatedGnss {
    fn kind(&self) -> SensorKind {
        SensorKind::Gnss
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.driver.init(self.name)
    }

    fn poll(&mut self) -> SensorSample {
        let truth = self.truth.get();
        if truth.time_us < self.fix_time_us {
            return SensorSample::invalid(truth.time_us);
        }

        SensorSample::new(truth.time_us).with(RawValue::Gnss {
            altitude_asl: truth.altitude_asl() + self.altitude_noise.sample(&mut self.rng),
            vertical_velocity: Some(
                truth.vertical_velocity + self.velocity_noise.sample(&mut self.rng),
            ),
        })
    }

    fn set_bias_correction_mode(&mut self, enabled: bool) {
        self.driver.set_bias_correction_mode(self.name, enabled);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use airbrake_guidance_core::{STANDARD_GRAVITY, pressure_altitude};
    use approx::assert_relative_eq;

    use super::*;
    use crate::physics::Truth;

    fn truth() -> SharedTruth {
        Rc::new(Cell::new(Truth::at_rest(250.0)))
    }

    #[test]
    fn isa_pressure_inverts_pressure_altitude() {
        for altitude in [0.0, 250.0, 1500.0, 3000.0] {
            assert_relative_eq!(
                pressure_altitude(isa_pressure(altitude)),
                altitude,
                epsilon = 0.5
            );
        }
    }

    #[test]
    fn barometer_reads_truth_plus_offset() {
        let truth = truth();
        let mut baro = SimulatedBarometer::new("baro", &truth, 1, 0.0, 50.0).unwrap();
        truth.set(Truth {
            time_us: 2_000,
            ..truth.get()
        });

        let sample = baro.poll();
        assert!(sample.valid);
        assert_eq!(sample.timestamp_us, 2_000);
        assert_eq!(
            sample.values[0],
            RawValue::Pressure(isa_pressure(250.0) + 50.0)
        );
    }

    #[test]
    fn imu_at_rest_reads_one_g_up() {
        let truth = truth();
        let mut imu = SimulatedImu::new("imu", &truth, 1, 0.0, 0.0, 0.0).unwrap();
        let sample = imu.poll();

        let RawValue::Acceleration { frame, value } = sample.values[0] else {
            panic!("expected acceleration, got {:?}", sample.values[0]);
        };
        assert_eq!(frame, Frame::Body);
        assert_relative_eq!(value.z, STANDARD_GRAVITY);
        assert!(matches!(sample.values[1], RawValue::AngularRate(_)));
    }

    #[test]
    fn gnss_invalid_before_fix() {
        let truth = truth();
        let mut gnss = SimulatedGnss::new("gnss", &truth, 1, 1.0, 0.1, 1_000_000).unwrap();
        assert!(!gnss.poll().valid);

        truth.set(Truth {
            time_us: 1_000_000,
            ..truth.get()
        });
        let sample = gnss.poll();
        assert!(sample.valid);
        assert!(matches!(
            sample.values[0],
            RawValue::Gnss {
                vertical_velocity: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn failing_imu_reports_init_error() {
        let truth = truth();
        let mut imu = SimulatedImu::new("imu", &truth, 1, 0.1, 0.0, 0.1)
            .unwrap()
            .failing(SensorError::NotResponding);
        assert_eq!(imu.init(), Err(SensorError::NotResponding));
    }

    #[test]
    fn bias_mode_is_tracked() {
        let truth = truth();
        let mut baro = SimulatedBarometer::new("baro", &truth, 1, 1.0, 0.0).unwrap();
        baro.set_bias_correction_mode(true);
        assert!(baro.driver.bias_correction);
        baro.set_bias_correction_mode(false);
        assert!(!baro.driver.bias_correction);
    }
}

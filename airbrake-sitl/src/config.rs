use std::{env, fs, path::Path};

use airbrake_guidance_core::{ControlMode, GuidanceConfig};
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Path of an optional TOML file overriding the defaults below.
pub const CONFIG_ENV_VAR: &str = "AIRBRAKE_SITL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitlConfig {
    pub guidance: GuidanceConfig,
    pub simulation: SimulationConfig,
    pub motor: MotorConfig,
    pub sensors: SensorConfig,
    pub output: OutputConfig,
}

impl Default for SitlConfig {
    fn default() -> Self {
        let mut guidance = GuidanceConfig::default();
        guidance.launch_site_altitude_asl = 250.0;
        guidance.controller.mode = ControlMode::Active;
        guidance.controller.target_apogee = 2800.0;

        Self {
            guidance,
            simulation: SimulationConfig::default(),
            motor: MotorConfig::default(),
            sensors: SensorConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl SitlConfig {
    /// Defaults, or the file named by `AIRBRAKE_SITL_CONFIG` when set.
    pub fn load() -> Result<Self> {
        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(Path::new(&path)),
            None => {
                info!("{} not set, using default configuration", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&config_str)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config = toml::from_str(config_str)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub physics_dt_us: u64,
    /// seconds on the pad before ignition
    pub ignition_time_s: f32,
    pub max_time_s: f32,
    /// keep flying this long after the true apogee
    pub stop_after_apogee_s: f32,
    /// airbrake travel speed, full extensions per second
    pub actuator_rate: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            physics_dt_us: 1_000,
            ignition_time_s: 10.0,
            max_time_s: 120.0,
            stop_after_apogee_s: 3.0,
            actuator_rate: 2.0,
        }
    }
}

/// Constant thrust motor, propellant burns off linearly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// N
    pub thrust: f32,
    /// s
    pub burn_time: f32,
    /// kg, on top of the burnout mass
    pub propellant_mass: f32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            thrust: 2000.0,
            burn_time: 3.0,
            propellant_mass: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Pa
    pub baro_noise: f32,
    /// Pa, constant offset of the second barometer
    pub secondary_baro_offset: f32,
    /// m/s^2
    pub accel_noise: f32,
    /// m/s^2, constant offset on the vertical axis
    pub accel_bias: f32,
    /// deg/s
    pub gyro_noise: f32,
    /// deg
    pub attitude_noise: f32,
    /// m
    pub gnss_altitude_noise: f32,
    /// m/s
    pub gnss_velocity_noise: f32,
    /// seconds after power on
    pub gnss_fix_time_s: f32,
    pub imu_fails_init: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            baro_noise: 3.0,
            secondary_baro_offset: 120.0,
            accel_noise: 0.3,
            accel_bias: 0.1,
            gyro_noise: 0.1,
            attitude_noise: 0.2,
            gnss_altitude_noise: 2.0,
            gnss_velocity_noise: 0.3,
            gnss_fix_time_s: 1.5,
            imu_fails_init: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub telemetry_csv: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            telemetry_csv: Some("telemetry.csv".into()),
        }
    }
}

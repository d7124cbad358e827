use serde::{Deserialize, Serialize};

use crate::{estimator::FusedState, phase::FlightPhase, utils::lerp};

mod rocket_dynamics;

pub use rocket_dynamics::{BallisticPredictor, DEFAULT_INTEGRATION_DT};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RocketParameters {
    pub burnout_mass: f32,
    /// cd is a look up table from extension percentage to cd
    /// e.g. cd[2] is cd at 50% extension percentage
    pub cd: [f32; 5],
    pub reference_area: f32,
}

impl RocketParameters {
    /// extension: 0.0 - 1.0
    pub fn cd_at_extension(&self, extension: f32) -> f32 {
        lerp(extension.clamp(0.0, 1.0), &self.cd)
    }
}

impl Default for RocketParameters {
    fn default() -> Self {
        Self {
            burnout_mass: 17.607,
            cd: [0.47044, 0.5082, 0.57784, 0.665, 0.74313],
            reference_area: 0.008982476,
        }
    }
}

/// Vertical state the apogee prediction starts from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoastState {
    /// m AGL
    pub altitude: f32,
    pub vertical_velocity: f32,
}

impl From<&FusedState> for CoastState {
    fn from(state: &FusedState) -> Self {
        Self {
            altitude: state.altitude,
            vertical_velocity: state.vertical_velocity,
        }
    }
}

/// Predicts apogee AGL when coasting with a constant airbrake extension.
/// Must not increase with extension.
pub trait ApogeePredictor {
    fn predict_apogee(&self, state: &CoastState, extension: f32) -> f32;

    fn set_launch_site_altitude(&mut self, _altitude_asl: f32) {}
}

/// Arming switch for deployment, brakes stay retracted unless `Active`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Retracted,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub mode: ControlMode,
    /// m AGL
    pub target_apogee: f32,
    pub rocket: RocketParameters,
    pub bisection_iterations: u8,
    /// seconds
    pub integration_dt: f32,
    pub retracted_angle_deg: f32,
    pub deployed_angle_deg: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::Retracted,
            target_apogee: 3000.0,
            rocket: RocketParameters::default(),
            bisection_iterations: 16,
            integration_dt: DEFAULT_INTEGRATION_DT,
            retracted_angle_deg: 0.0,
            deployed_angle_deg: -10.0,
        }
    }
}

impl ControllerConfig {
    pub fn angle_for_extension(&self, extension: f32) -> f32 {
        let extension = extension.clamp(0.0, 1.0);
        self.retracted_angle_deg + extension * (self.deployed_angle_deg - self.retracted_angle_deg)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirbrakeCommand {
    /// 0.0 retracted - 1.0 fully deployed
    pub extension: f32,
    pub angle_deg: f32,
    pub time_us: u64,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApogeePrediction {
    /// m AGL with the brakes retracted
    pub retracted: f32,
    /// m AGL with the brakes fully deployed
    pub deployed: f32,
}

/// Picks the airbrake extension whose predicted apogee meets the target.
pub struct AirbrakeController<P: ApogeePredictor = BallisticPredictor> {
    config: ControllerConfig,
    predictor: P,
    active: bool,
    last_command: AirbrakeCommand,
    last_prediction: Option<ApogeePrediction>,
}

impl AirbrakeController<BallisticPredictor> {
    pub fn new(config: ControllerConfig, launch_site_altitude_asl: f32) -> Self {
        let predictor = BallisticPredictor::new(
            config.rocket.clone(),
            launch_site_altitude_asl,
            config.integration_dt,
        );
        Self::with_predictor(config, predictor)
    }
}

impl<P: ApogeePredictor> AirbrakeController<P> {
    pub fn with_predictor(config: ControllerConfig, predictor: P) -> Self {
        let last_command = AirbrakeCommand {
            extension: 0.0,
            angle_deg: config.angle_for_extension(0.0),
            time_us: 0,
        };
        Self {
            config,
            predictor,
            active: false,
            last_command,
            last_prediction: None,
        }
    }

    /// Arms the control law for the coast phase.
    pub fn activate(&mut self, launch_site_altitude_asl: f32) {
        self.predictor
            .set_launch_site_altitude(launch_site_altitude_asl);
        self.active = true;
        log_info!(
            "airbrake control active, mode {:?}, target {} m AGL",
            self.config.mode,
            self.config.target_apogee
        );
    }

    pub fn deactivate(&mut self) {
        if self.active {
            log_info!("airbrake control inactive");
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// One command per cycle. Anything but an active controller in COAST
    /// with deployment armed gets the fully retracted command.
    pub fn update(&mut self, phase: FlightPhase, state: &FusedState) -> AirbrakeCommand {
        let deploying =
            self.active && phase == FlightPhase::Coast && self.config.mode == ControlMode::Active;

        let extension = if deploying {
            let (extension, prediction) = self.solve_extension(&CoastState::from(state));
            self.last_prediction = Some(prediction);
            extension
        } else {
            if self.active && phase == FlightPhase::Coast {
                // still publish what the brakes would do
                self.last_prediction = Some(self.predict_bounds(&CoastState::from(state)));
            }
            0.0
        };

        self.command(extension, state.time_us)
    }

    /// Forces full retraction regardless of phase.
    pub fn retract(&mut self, time_us: u64) -> AirbrakeCommand {
        self.command(0.0, time_us)
    }

    fn command(&mut self, extension: f32, time_us: u64) -> AirbrakeCommand {
        self.last_command = AirbrakeCommand {
            extension,
            angle_deg: self.config.angle_for_extension(extension),
            time_us,
        };
        self.last_command
    }

    fn predict_bounds(&self, state: &CoastState) -> ApogeePrediction {
        ApogeePrediction {
            retracted: self.predictor.predict_apogee(state, 0.0),
            deployed: self.predictor.predict_apogee(state, 1.0),
        }
    }

    /// Returns the extension in [0, 1] and the apogee bounds it was derived
    /// from. Bisection runs a fixed number of iterations and returns the
    /// midpoint of the final bracket.
    pub fn solve_extension(&self, state: &CoastState) -> (f32, ApogeePrediction) {
        let target = self.config.target_apogee;
        let prediction = self.predict_bounds(state);

        if prediction.retracted <= target {
            return (0.0, prediction);
        }
        if prediction.deployed >= target {
            log_debug!(
                "target {} unreachable, full extension still reaches {}",
                target,
                prediction.deployed
            );
            return (1.0, prediction);
        }

        let mut low = 0.0f32;
        let mut high = 1.0f32;
        for _ in 0..self.config.bisection_iterations {
            let mid = 0.5 * (low + high);
            // Monotonic: more extension -> lower apogee
            if self.predictor.predict_apogee(state, mid) > target {
                low = mid;
            } else {
                high = mid;
            }
        }

        ((0.5 * (low + high)).clamp(0.0, 1.0), prediction)
    }

    pub fn last_command(&self) -> &AirbrakeCommand {
        &self.last_command
    }

    pub fn last_prediction(&self) -> Option<&ApogeePrediction> {
        self.last_prediction.as_ref()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}
